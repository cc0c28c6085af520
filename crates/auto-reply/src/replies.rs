//! Fixed user-facing texts.

pub const HELP: &str = "Available commands:\n\
/image <prompt>  generate an image\n\
/clear  forget this conversation\n\
/help  show this message\n\
Anything else is sent to the assistant.";

pub const CLEARED: &str = "Conversation cleared.";

pub const UNSUPPORTED: &str = "Sorry, this message type is not supported yet. Please send text or a voice message.";

pub const AUDIO_FAILED: &str = "Sorry, I couldn't process that voice message.";

pub const BACKEND_FAILED: &str = "Sorry, something went wrong while generating a reply. Please try again later.";

pub const IMAGE_FAILED: &str = "Sorry, the image could not be generated.";
