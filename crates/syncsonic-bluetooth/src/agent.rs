//! BlueZ pairing agent.
//!
//! A no-input/no-output agent that auto-confirms speaker pairing: passkey
//! confirmation always succeeds, PIN requests answer a fixed code, and
//! service authorization (A2DP) is granted. Requests arriving through the
//! reserved adapter are rejected; that controller only talks BLE to the
//! phone and never pairs classic devices.

use bluer::agent::{Agent, AgentHandle, ReqError, ReqResult};
use bluer::Session;
use futures::FutureExt;
use tracing::{debug, info};

use crate::error::Result;

/// Fixed PIN answered to legacy devices that ask for one.
const STATIC_PIN: &str = "0000";

/// Build and register the default pairing agent.
///
/// The returned handle keeps the agent registered; dropping it
/// unregisters on shutdown.
pub async fn register_pairing_agent(session: &Session, reserved: &str) -> Result<AgentHandle> {
    let agent = build_agent(reserved);
    let handle = session.register_agent(agent).await?;
    info!("Pairing agent registered as default");
    Ok(handle)
}

fn build_agent(reserved: &str) -> Agent {
    let reserved = reserved.to_string();

    let guard = move |adapter: &str| -> ReqResult<()> {
        if adapter == reserved {
            debug!("Rejecting agent request on reserved adapter {}", adapter);
            Err(ReqError::Rejected)
        } else {
            Ok(())
        }
    };

    let g_pin = guard.clone();
    let g_passkey = guard.clone();
    let g_confirm = guard.clone();
    let g_authorize = guard.clone();
    let g_service = guard;

    Agent {
        request_default: true,
        request_pin_code: Some(Box::new(move |req| {
            let verdict = g_pin(&req.adapter);
            async move {
                verdict?;
                debug!("PIN code requested by {}", req.device);
                Ok(STATIC_PIN.to_string())
            }
            .boxed()
        })),
        request_passkey: Some(Box::new(move |req| {
            let verdict = g_passkey(&req.adapter);
            async move {
                verdict?;
                debug!("Passkey requested by {}", req.device);
                Ok(0)
            }
            .boxed()
        })),
        request_confirmation: Some(Box::new(move |req| {
            let verdict = g_confirm(&req.adapter);
            async move {
                verdict?;
                debug!(
                    "Auto-confirming passkey {:06} for {}",
                    req.passkey, req.device
                );
                Ok(())
            }
            .boxed()
        })),
        request_authorization: Some(Box::new(move |req| {
            let verdict = g_authorize(&req.adapter);
            async move {
                verdict?;
                debug!("Authorizing {}", req.device);
                Ok(())
            }
            .boxed()
        })),
        authorize_service: Some(Box::new(move |req| {
            let verdict = g_service(&req.adapter);
            async move {
                verdict?;
                debug!("Authorizing service {} for {}", req.service, req.device);
                Ok(())
            }
            .boxed()
        })),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_requests_default_registration() {
        let agent = build_agent("hci0");
        assert!(agent.request_default);
        assert!(agent.request_pin_code.is_some());
        assert!(agent.request_passkey.is_some());
        assert!(agent.request_confirmation.is_some());
        assert!(agent.authorize_service.is_some());
    }

    #[tokio::test]
    #[ignore = "requires real Bluetooth hardware"]
    async fn agent_registration() {
        let session = Session::new().await.unwrap();
        let handle = register_pairing_agent(&session, "hci0").await;
        assert!(handle.is_ok());
    }
}
