//! Signed proof cards.
//!
//! A [`ProofCard`] records the risk vector and estimates behind a policy
//! decision for one page. The signature is a keyed BLAKE3 digest over the
//! canonical JSON of `{pageId, policy_version, risk}`; changing any of those
//! fields invalidates it.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use super::risk::RiskVector;
use crate::contracts::PreparedSpec;

const KEY_CONTEXT: &str = "compose_guard 2024 proof card signing v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofCard {
    #[serde(rename = "pageId")]
    pub page_id: String,
    pub policy_version: String,
    pub risk: RiskVector,
    pub signature: String,
    pub cls_est: f64,
    pub lcp_est_ms: u32,
    pub bytes: u32,
    pub ux_score: u32,
    pub ux_issues: Vec<String>,
    pub a11y: Option<bool>,
    pub created_at: String,
}

/// Holds the derived signing key.
#[derive(Clone)]
pub struct ProofSigner {
    key: [u8; 32],
}

impl ProofSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
        }
    }

    fn digest(&self, page_id: &str, policy_version: &str, risk: &RiskVector) -> blake3::Hash {
        // serde_json maps are key-sorted, so this is canonical
        let msg = json!({
            "pageId": page_id,
            "policy_version": policy_version,
            "risk": risk,
        })
        .to_string();
        blake3::keyed_hash(&self.key, msg.as_bytes())
    }

    pub fn sign(&self, page_id: &str, policy_version: &str, risk: &RiskVector) -> String {
        self.digest(page_id, policy_version, risk).to_hex().to_string()
    }

    pub fn verify(&self, card: &ProofCard) -> bool {
        match blake3::Hash::from_hex(card.signature.as_str()) {
            Ok(claimed) => claimed == self.digest(&card.page_id, &card.policy_version, &card.risk),
            Err(_) => false,
        }
    }

    /// Builds and signs a card for a verified page.
    pub fn issue(
        &self,
        page_id: &str,
        policy_version: &str,
        risk: RiskVector,
        prepared: &PreparedSpec,
    ) -> ProofCard {
        let signature = self.sign(page_id, policy_version, &risk);
        ProofCard {
            page_id: page_id.to_string(),
            policy_version: policy_version.to_string(),
            a11y: risk.a11y.pass,
            risk,
            signature,
            cls_est: prepared.perf.cls_est,
            lcp_est_ms: prepared.perf.lcp_est_ms,
            bytes: prepared.perf.bytes,
            ux_score: prepared.ux.score,
            ux_issues: prepared.ux.issues.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Stable page id for a session's verified spec.
pub fn page_id_for(session_id: &str, spec_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(spec_json.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("pg_{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{verify_and_prepare, Spec};

    fn card(signer: &ProofSigner) -> ProofCard {
        let mut risk = RiskVector::default();
        risk.device_perf.cls_est = Some(0.03);
        let prepared = verify_and_prepare(&Spec::default());
        signer.issue("pg_abc", "2.0.0", risk, &prepared)
    }

    #[test]
    fn test_signature_verifies() {
        let signer = ProofSigner::new("secret");
        let card = card(&signer);
        assert_eq!(card.signature.len(), 64);
        assert!(signer.verify(&card));
    }

    #[test]
    fn test_tampering_invalidates() {
        let signer = ProofSigner::new("secret");

        let mut c = card(&signer);
        c.risk.prompt_risk = true;
        assert!(!signer.verify(&c));

        let mut c = card(&signer);
        c.policy_version = "9.9.9".into();
        assert!(!signer.verify(&c));

        let mut c = card(&signer);
        c.signature = "zz".into();
        assert!(!signer.verify(&c));
    }

    #[test]
    fn test_other_secret_rejects() {
        let c = card(&ProofSigner::new("one"));
        assert!(!ProofSigner::new("two").verify(&c));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = ProofSigner::new("s");
        let risk = RiskVector::default();
        assert_eq!(signer.sign("p", "v", &risk), signer.sign("p", "v", &risk));
    }

    #[test]
    fn test_page_id_shape() {
        let a = page_id_for("s1", "{}");
        assert!(a.starts_with("pg_"));
        assert_eq!(a.len(), 19);
        assert_ne!(a, page_id_for("s2", "{}"));
    }

    #[test]
    fn test_card_serializes_page_id_as_page_id_key() {
        let v = serde_json::to_value(card(&ProofSigner::new("s"))).unwrap();
        assert!(v.get("pageId").is_some());
        assert!(v.get("policy_version").is_some());
        assert!(v.get("created_at").is_some());
    }
}
