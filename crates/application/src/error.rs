use domain::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("session error: {0}")]
    Session(String),
    #[error("infrastructure error: {message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("collaborator call timed out: {0}")]
    Timeout(&'static str),
    #[error("authentication failed: {0}")]
    Authentication(String),
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: None,
        }
    }

    /// 创建携带底层错误的基础设施错误
    pub fn infrastructure_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        ApplicationError::Session(message.into())
    }
}
