use crate::backend::BackendError;

/// What went wrong, from the console's point of view.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    /// Network/timeout style failure while polling; retried on the next tick.
    #[error("fetch failed: {0}")]
    TransientFetch(#[source] BackendError),
    /// The backend answered but refused or garbled a fetch. Retrying will not help
    /// until something changes on the server side.
    #[error("{what} fetch rejected: {reason}")]
    FetchRejected { what: String, reason: String },
    /// The transport refused a send. The optimistic entry is gone.
    #[error("send failed: {reason}")]
    SendFailure { reason: String },
    /// No dialable number could be recovered. Informational only.
    #[error("no dialable number in {raw:?}")]
    IdentityAmbiguous { raw: String },
}

impl ConsoleError {
    pub fn send_failure(err: &BackendError) -> Self {
        ConsoleError::SendFailure {
            reason: reason_of(err),
        }
    }

    pub fn fetch_rejected(what: &str, err: &BackendError) -> Self {
        ConsoleError::FetchRejected {
            what: what.to_string(),
            reason: reason_of(err),
        }
    }

    pub fn user_visible_message(&self) -> Option<String> {
        match self {
            ConsoleError::TransientFetch(_) => {
                Some("Connection problems, retrying in the background".to_string())
            }
            ConsoleError::FetchRejected { what, reason } => {
                Some(format!("Could not load {what}: {reason}"))
            }
            ConsoleError::SendFailure { reason } => Some(format!("Message not sent: {reason}")),
            ConsoleError::IdentityAmbiguous { .. } => None,
        }
    }
}

fn reason_of(err: &BackendError) -> String {
    match err {
        BackendError::Rejected { message, .. } if !message.trim().is_empty() => {
            message.trim().to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_send_surfaces_backend_message() {
        let err = ConsoleError::send_failure(&BackendError::Rejected {
            status: 422,
            message: "24h window closed".into(),
        });
        assert_eq!(
            err.user_visible_message().as_deref(),
            Some("Message not sent: 24h window closed")
        );
    }

    #[test]
    fn rejected_fetch_names_what_failed() {
        let err = ConsoleError::fetch_rejected(
            "conversations",
            &BackendError::Rejected {
                status: 401,
                message: "bad token".into(),
            },
        );
        assert_eq!(
            err.user_visible_message().as_deref(),
            Some("Could not load conversations: bad token")
        );
        let garbled = ConsoleError::fetch_rejected(
            "messages",
            &BackendError::InvalidPayload("expected array".into()),
        );
        assert_eq!(
            garbled.user_visible_message().as_deref(),
            Some("Could not load messages: invalid payload: expected array")
        );
    }

    #[test]
    fn ambiguous_identity_is_silent() {
        let err = ConsoleError::IdentityAmbiguous {
            raw: "98765432109876543@lid".into(),
        };
        assert_eq!(err.user_visible_message(), None);
        assert!(err.to_string().contains("98765432109876543@lid"));
    }
}
