//! Media-room service client and join-token minting.
//!
//! Rooms are created idempotently (a room that already exists is a
//! success) and join tokens are HS256 credentials restricted to one
//! room, with a short TTL and the call's identifiers in the metadata
//! claim for log correlation on the room side.

use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use vx_domain::config::RoomsConfig;
use vx_domain::{token, Error, Result};

/// Everything stamped into a join token's metadata claim.
pub struct JoinGrant<'a> {
    pub room: &'a str,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub twilio_call_sid: &'a str,
    pub trace_id: Uuid,
}

#[derive(Clone)]
pub struct RoomServiceClient {
    cfg: RoomsConfig,
    http: reqwest::Client,
}

impl RoomServiceClient {
    pub fn new(cfg: RoomsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { cfg, http })
    }

    /// The URL connectors join rooms at.
    pub fn livekit_url(&self) -> &str {
        &self.cfg.service_url
    }

    /// Create the room if it doesn't exist. "Already exists" (409) is
    /// success; anything else propagates.
    pub async fn ensure_room(&self, name: &str) -> Result<()> {
        let admin_token = self.mint_admin_token()?;
        let response = self
            .http
            .post(format!(
                "{}/twirp/livekit.RoomService/CreateRoom",
                self.cfg.service_url.trim_end_matches('/')
            ))
            .bearer_auth(admin_token)
            .json(&json!({
                "name": name,
                "emptyTimeout": self.cfg.empty_timeout_sec,
                "maxParticipants": self.cfg.max_participants,
            }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("room create: {e}")))?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("already exists") {
            return Ok(());
        }
        Err(Error::Http(format!("room create returned {status}: {body}")))
    }

    /// Mint the agent's one-time join token: subject `agent-<id>`,
    /// join/publish/subscribe grants restricted to the named room.
    pub fn mint_join_token(&self, grant: &JoinGrant<'_>, ttl: Duration) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let metadata = json!({
            "tenant_id": grant.tenant_id,
            "agent_id": grant.agent_id,
            "twilio_call_sid": grant.twilio_call_sid,
            "trace_id": grant.trace_id,
        });
        let claims = json!({
            "iss": self.cfg.api_key,
            "sub": format!("agent-{}", grant.agent_id),
            "nbf": now - 10,
            "exp": now + ttl.as_secs() as i64,
            "video": {
                "room": grant.room,
                "roomJoin": true,
                "canPublish": true,
                "canSubscribe": true,
            },
            "metadata": metadata.to_string(),
        });
        token::sign(&self.cfg.api_secret, &claims)
    }

    fn mint_admin_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = json!({
            "iss": self.cfg.api_key,
            "sub": "voxlane-worker",
            "nbf": now - 10,
            "exp": now + 60,
            "video": { "roomCreate": true },
        });
        token::sign(&self.cfg.api_secret, &claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RoomServiceClient {
        let cfg = RoomsConfig {
            api_key: "key1".into(),
            api_secret: "sekrit".into(),
            ..RoomsConfig::default()
        };
        RoomServiceClient::new(cfg).unwrap()
    }

    #[test]
    fn join_token_carries_room_scoped_grants() {
        let agent_id = Uuid::new_v4();
        let trace_id = Uuid::new_v4();
        let grant = JoinGrant {
            room: "call-CA1",
            tenant_id: Uuid::new_v4(),
            agent_id,
            twilio_call_sid: "CA1",
            trace_id,
        };
        let minted = client()
            .mint_join_token(&grant, Duration::from_secs(600))
            .unwrap();

        let payload = token::open("sekrit", &minted).unwrap();
        assert_eq!(payload["sub"], format!("agent-{agent_id}"));
        assert_eq!(payload["iss"], "key1");
        assert_eq!(payload["video"]["room"], "call-CA1");
        assert_eq!(payload["video"]["roomJoin"], true);
        assert_eq!(payload["video"]["canPublish"], true);
        assert_eq!(payload["video"]["canSubscribe"], true);

        let metadata: serde_json::Value =
            serde_json::from_str(payload["metadata"].as_str().unwrap()).unwrap();
        assert_eq!(metadata["twilio_call_sid"], "CA1");
        assert_eq!(metadata["trace_id"], trace_id.to_string());

        let exp = payload["exp"].as_i64().unwrap();
        let nbf = payload["nbf"].as_i64().unwrap();
        assert_eq!(exp - nbf, 610);
    }

    #[test]
    fn join_token_rejects_wrong_signing_secret() {
        let grant = JoinGrant {
            room: "call-CA1",
            tenant_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            twilio_call_sid: "CA1",
            trace_id: Uuid::new_v4(),
        };
        let minted = client()
            .mint_join_token(&grant, Duration::from_secs(600))
            .unwrap();
        assert!(token::open("wrong", &minted).is_err());
    }
}
