//! Handlers registered by the `run` command.

use std::time::Duration;

use sentinel_actors::{JobHandlerRegistry, JobResult, job_handler};

/// Demo handlers: `echo`, `sleep`, `fail` and `email`.
pub fn demo_registry() -> JobHandlerRegistry {
    JobHandlerRegistry::new()
        .with(job_handler!("echo", |job| {
            tracing::info!(job_id = %job.id, payload = %job.payload, "Echo job");
            Ok(JobResult::with_output("Echo completed", job.payload))
        }))
        .with(job_handler!("sleep", |job| {
            let seconds = job
                .payload
                .get("seconds")
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            match Duration::try_from_secs_f64(seconds) {
                Ok(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(JobResult::new(format!("Slept for {} seconds", seconds)))
                }
                Err(e) => Err(format!("Invalid sleep duration {}: {}", seconds, e)),
            }
        }))
        .with(job_handler!("fail", |job| {
            let should_fail = job
                .payload
                .get("fail")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if should_fail {
                Err("Intentional failure".into())
            } else {
                Ok(JobResult::new("Success"))
            }
        }))
        .with(job_handler!("email", |job| {
            match job.payload.get("to").and_then(|v| v.as_str()) {
                Some(to) => {
                    tracing::info!(job_id = %job.id, to, "Sending email");
                    Ok(JobResult::with_output(
                        "Email sent",
                        serde_json::json!({ "to": to }),
                    ))
                }
                None => Err("Email job payload has no \"to\" address".into()),
            }
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_actors::Job;
    use serde_json::json;

    #[tokio::test]
    async fn demo_handlers_are_registered() {
        let registry = demo_registry();
        assert_eq!(registry.job_types(), vec!["echo", "email", "fail", "sleep"]);
    }

    #[tokio::test]
    async fn email_handler_requires_an_address() {
        let registry = demo_registry();
        let Some(email) = registry.get("email") else {
            panic!("email handler missing");
        };

        let sent = email.handle(&Job::new("email", json!({"to": "a@b.com"}))).await;
        assert_eq!(
            sent,
            Ok(JobResult::with_output("Email sent", json!({"to": "a@b.com"})))
        );

        let missing = email.handle(&Job::new("email", json!({}))).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn fail_handler_can_be_told_to_succeed() {
        let registry = demo_registry();
        let Some(fail) = registry.get("fail") else {
            panic!("fail handler missing");
        };
        assert!(fail.handle(&Job::new("fail", json!({}))).await.is_err());
        assert!(
            fail.handle(&Job::new("fail", json!({"fail": false})))
                .await
                .is_ok()
        );
    }
}
