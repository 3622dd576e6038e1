//! Connection fingerprinting
//!
//! A fingerprint is the deterministic cache key for one logical
//! connection. Every cached resource (client handle, tunnel, schema
//! metadata) is keyed by it, so the rules below decide both cache
//! correctness and resource lifetime:
//!
//! 1. Agent-proxied connections key on `{id, token, signing_key}` — the
//!    transport fields are meaningless for a proxied dial.
//! 2. Disposable test connections key on `host` alone; the wizard creates
//!    them host-unique and throws them away.
//! 3. SSH-tunneled connections key on `{id, signing_key, engine,
//!    username, database}`. Host and port are deliberately excluded:
//!    the tunnel manager rewrites them to `127.0.0.1:<local port>` once
//!    forwarding is up, and a key containing them would fragment the
//!    cache on every re-derivation.
//! 4. Direct connections key on `{id, signing_key, host, port, username,
//!    database}` so a rotated host produces a fresh client.
//!
//! Identity fields are joined and hashed (SHA-256, hex) so keys are
//! fixed-width and never carry credentials into logs or metrics.

use ring::digest;

use crate::ConnectionParams;

/// Separator between identity fields before hashing. A control character
/// keeps `("ab", "c")` and `("a", "bc")` from colliding.
const FIELD_SEP: &str = "\u{1f}";

/// Compute the stable cache key for a logical connection.
///
/// Pure function: equal identity fields always produce equal keys, and
/// in-place mutation of transport fields after tunneling never changes
/// the key for tunneled or agent connections.
pub fn fingerprint(params: &ConnectionParams) -> String {
    let fields: Vec<String> = if let Some(agent) = &params.agent {
        vec![
            "agent".to_string(),
            params.id.to_string(),
            agent.token.clone(),
            agent.signing_key.clone(),
        ]
    } else if params.is_test_connection {
        vec!["test".to_string(), params.host.clone()]
    } else if params.ssh.is_some() {
        vec![
            "ssh".to_string(),
            params.id.to_string(),
            params.signing_key.clone(),
            params.engine.as_str().to_string(),
            params.username.clone(),
            params.database.clone(),
        ]
    } else {
        vec![
            "direct".to_string(),
            params.id.to_string(),
            params.signing_key.clone(),
            params.host.clone(),
            params.port.to_string(),
            params.username.clone(),
            params.database.clone(),
        ]
    };

    let joined = fields.join(FIELD_SEP);
    let hash = digest::digest(&digest::SHA256, joined.as_bytes());
    hex::encode(hash.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SshParams;
    use crate::{AgentParams, EngineType};
    use pretty_assertions::assert_eq;

    fn ssh_params() -> ConnectionParams {
        ConnectionParams::new(EngineType::Postgres, "db.internal", 5432)
            .credentials("app", "pw")
            .database("orders")
            .signing_key("sk-1")
            .ssh(SshParams::new("bastion", "deploy", "PEM"))
    }

    #[test]
    fn stable_across_calls() {
        let params = ssh_params();
        assert_eq!(fingerprint(&params), fingerprint(&params));
    }

    #[test]
    fn ssh_key_survives_endpoint_rewrite() {
        let params = ssh_params();
        let before = fingerprint(&params);

        let mut rewritten = params.clone();
        rewritten.rewrite_endpoint("127.0.0.1", 49181);
        assert_eq!(before, fingerprint(&rewritten));
    }

    #[test]
    fn direct_key_changes_with_host() {
        let params = ConnectionParams::new(EngineType::Mysql, "db-a.internal", 3306)
            .credentials("root", "pw")
            .database("app")
            .signing_key("sk-2");
        let mut moved = params.clone();
        moved.host = "db-b.internal".to_string();
        assert_ne!(fingerprint(&params), fingerprint(&moved));
    }

    #[test]
    fn key_changes_with_id_and_database() {
        let params = ssh_params();

        let mut other_id = params.clone();
        other_id.id = uuid::Uuid::new_v4();
        assert_ne!(fingerprint(&params), fingerprint(&other_id));

        let mut other_db = params.clone();
        other_db.database = "billing".to_string();
        assert_ne!(fingerprint(&params), fingerprint(&other_db));
    }

    #[test]
    fn agent_rule_dominates() {
        let mut params = ssh_params();
        let direct_key = fingerprint(&params);

        params.agent = Some(AgentParams {
            token: "tok-1".to_string(),
            signing_key: "ak-1".to_string(),
        });
        let agent_key = fingerprint(&params);
        assert_ne!(direct_key, agent_key);

        // transport fields are irrelevant once proxied
        let mut other_host = params.clone();
        other_host.host = "elsewhere".to_string();
        other_host.port = 9;
        assert_eq!(agent_key, fingerprint(&other_host));
    }

    #[test]
    fn test_connections_key_on_host_alone() {
        let a = ConnectionParams::new(EngineType::Postgres, "trial-1.local", 5432)
            .signing_key("sk-a")
            .test_connection();
        let mut b = a.clone();
        b.id = uuid::Uuid::new_v4();
        b.signing_key = "sk-b".to_string();
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let mut c = a.clone();
        c.host = "trial-2.local".to_string();
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn kinds_do_not_collide() {
        // same identity fields under different kinds must stay distinct
        let direct = ConnectionParams::new(EngineType::Postgres, "h", 1)
            .credentials("u", "p")
            .database("d")
            .signing_key("s");
        let mut test = direct.clone();
        test.is_test_connection = true;
        assert_ne!(fingerprint(&direct), fingerprint(&test));
    }
}
