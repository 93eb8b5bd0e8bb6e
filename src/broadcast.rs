//! Admin announcements to users who started the bot.

use log::{info, warn};
use std::future::Future;
use std::time::Duration;
use teloxide::{ApiError, RequestError};

#[derive(Debug)]
pub enum Failure {
    /// The user blocked the bot or the account is gone.
    Blocked,
    Other(String),
}

impl From<RequestError> for Failure {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Api(
                ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::ChatNotFound
                | ApiError::BotKicked,
            ) => Failure::Blocked,
            other => Failure::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub delivered: usize,
    pub blocked: Vec<i64>,
    pub failed: usize,
}

pub async fn deliver<F, Fut>(recipients: &[i64], delay: Duration, mut send: F) -> Report
where
    F: FnMut(i64) -> Fut,
    Fut: Future<Output = Result<(), Failure>>,
{
    let mut report = Report::default();

    for (i, &user_id) in recipients.iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match send(user_id).await {
            Ok(()) => report.delivered += 1,
            Err(Failure::Blocked) => {
                info!("subscriber {} is unreachable", user_id);
                report.blocked.push(user_id);
            }
            Err(Failure::Other(e)) => {
                warn!("failed to deliver to {}: {}", user_id, e);
                report.failed += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn sorts_outcomes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let report = deliver(&[1, 2, 3, 4], Duration::ZERO, |user_id| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(user_id);
                match user_id {
                    2 => Err(Failure::Blocked),
                    4 => Err(Failure::Other("timeout".into())),
                    _ => Ok(()),
                }
            }
        })
        .await;

        assert_eq!(
            report,
            Report {
                delivered: 2,
                blocked: vec![2],
                failed: 1,
            }
        );
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_sends() {
        let started = tokio::time::Instant::now();
        let report = deliver(&[1, 2, 3], Duration::from_millis(100), |_| async { Ok(()) }).await;
        assert_eq!(report.delivered, 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn classifies_blocked_users() {
        assert!(matches!(
            Failure::from(RequestError::Api(ApiError::BotBlocked)),
            Failure::Blocked
        ));
        assert!(matches!(
            Failure::from(RequestError::Api(ApiError::MessageTextIsEmpty)),
            Failure::Other(_)
        ));
    }
}
