//! Header names read and written by the plugin.

/// Unique id of the message.
pub const MESSAGE_ID: &str = "NServiceBus.MessageId";

/// Machine the message was sent from.
pub const ORIGINATING_MACHINE: &str = "NServiceBus.OriginatingMachine";

/// Logical endpoint the message was sent from.
pub const ORIGINATING_ENDPOINT: &str = "NServiceBus.OriginatingEndpoint";

/// Send time, in the wire time format (see [`crate::wire`]).
pub const TIME_SENT: &str = "NServiceBus.TimeSent";

/// `Send`, `Publish`, `Reply`, `Subscribe` or `Unsubscribe`.
pub const MESSAGE_INTENT: &str = "NServiceBus.MessageIntent";

/// Present with value `true` on saga timeout messages.
pub const IS_SAGA_TIMEOUT_MESSAGE: &str = "NServiceBus.IsSagaTimeoutMessage";

/// Full type names of the message(s) carried in the body.
pub const ENCLOSED_MESSAGE_TYPES: &str = "NServiceBus.EnclosedMessageTypes";

/// MIME type of the body.
pub const CONTENT_TYPE: &str = "NServiceBus.ContentType";

/// Address replies should be sent to.
pub const REPLY_TO_ADDRESS: &str = "NServiceBus.ReplyToAddress";

/// Marks infrastructure messages that carry no logical message.
pub const CONTROL_MESSAGE: &str = "NServiceBus.ControlMessage";

/// Correlation header: `;`-separated `<sagaType>:<sagaId>` tokens for every
/// saga invoked while processing the message.
pub const INVOKED_SAGAS: &str = "NServiceBus.InvokedSagas";

/// State-change summary: `;`-separated `<sagaId>:<New|Updated|Completed>`
/// tokens.
pub const SAGA_STATE_CHANGE: &str = "ServiceControl.SagaStateChange";

/// Separator used by the two accumulating headers above.
pub const TOKEN_SEPARATOR: char = ';';
