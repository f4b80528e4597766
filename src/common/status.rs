use crate::proto;

/// Status codes carried in every reply to a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    /// A model with the same name is already registered.
    Exists = 1,
    /// No model found with the provided name.
    NoExists = 2,
    /// The supplied signature does not match the registered one.
    Signature = 3,
    /// Directory setup failed on a server.
    Mkdir = 4,
    /// Transport or size error during a bulk transfer.
    Io = 5,
    /// The server has no backend configured.
    Backend = 6,
    /// A remote region operation failed.
    Storage = 7,
    /// Operation not implemented.
    NoImpl = 8,
}

impl StatusCode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(StatusCode::Ok),
            1 => Some(StatusCode::Exists),
            2 => Some(StatusCode::NoExists),
            3 => Some(StatusCode::Signature),
            4 => Some(StatusCode::Mkdir),
            5 => Some(StatusCode::Io),
            6 => Some(StatusCode::Backend),
            7 => Some(StatusCode::Storage),
            8 => Some(StatusCode::NoImpl),
            _ => None,
        }
    }
}

/// Result of a client-visible operation. The message is free-form and
/// user-visible only, except for `reload_model` where an `Ok` status carries
/// the model config in its message.
#[derive(Debug, Clone)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Status::new(StatusCode::Ok, "OK")
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Status::new(StatusCode::Ok, message)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl From<Status> for proto::common::Status {
    fn from(s: Status) -> Self {
        proto::common::Status {
            code: s.code as i32,
            message: s.message,
        }
    }
}

impl From<proto::common::Status> for Status {
    fn from(s: proto::common::Status) -> Self {
        Status {
            code: StatusCode::from_code(s.code).unwrap_or(StatusCode::Io),
            message: s.message,
        }
    }
}
