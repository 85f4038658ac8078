/// One `Program data:` payload emitted by the escrow program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLog {
    /// The slot the emitting transaction landed in.
    pub slot: u64,
    /// The emitting transaction's signature.
    pub signature: String,
    /// The raw (base64-decoded) event bytes.
    pub data: Vec<u8>,
}

/// Transaction context passed to event handlers alongside the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    /// The slot number where the transaction was confirmed.
    pub slot: u64,
    /// The transaction signature.
    pub signature: String,
}

impl From<&ProgramLog> for EventContext {
    fn from(log: &ProgramLog) -> Self {
        Self {
            slot: log.slot,
            signature: log.signature.clone(),
        }
    }
}
