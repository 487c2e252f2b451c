//! Fixed texts: model directives and user-facing notices.

/// Default system directive for the text chat model.
pub const SYSTEM_DIRECTIVE: &str = r#####"
You are a helpful assistant taking part in a group chat on a platform like Discord or Slack.  Each user talks to you in their own conversation, so you only see what this user has said to you in this channel.

Keep replies concise and conversational.  The platform renders a limited flavor of markdown: bold, italics, inline code, and fenced code blocks work; tables and math formatting do not, so avoid them.
"#####;

/// Prompt sent with an image when the user did not write anything.
pub const DEFAULT_IMAGE_PROMPT: &str = "describe this photo";

/// Placeholder reply shown while the model is working.
pub const PLACEHOLDER: &str = "Thinking...";

/// Reply for attachments that are not a supported image type.
pub const INVALID_IMAGE_TYPE: &str = "Invalid image type. Please upload a jpg, jpeg, png, or webp image.";

/// Reply when the attachment could not be fetched.
pub const DOWNLOAD_FAILED: &str = "An error occurred processing the image.";

/// Appended to the reply when the model fails mid-request.
pub const BACKEND_FAILED: &str = "_An error occurred while generating a response._";

/// Shown when the model finishes without producing any text.
pub const EMPTY_COMPLETION: &str = "_The model returned an empty response._";
