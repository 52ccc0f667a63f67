//! Resume tokens
//!
//! A resume token is a short, copyable piece of text that carries a complete
//! [`SessionBinding`]: project, branch and the engine conversation. Any context that
//! holds a token can continue the conversation without asking the session registry.
//!
//! Token layout is `cr<version>_<base64url payload>`:
//!
//! - **v1** payload: `project NUL branch NUL engine NUL conversation`, empty fields
//!   meaning "root checkout" / "no conversation".
//! - **v2** payload: compact JSON.
//!
//! Both payloads are followed by the first four bytes of their SHA-256, so a
//! corrupted token is rejected instead of decoding into a different binding.
//!
//! New tokens are always written in [`CURRENT_VERSION`]; every older version stays
//! decodable.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{BranchName, ConversationRef, ProjectName, SessionBinding};
use crate::error::{BridgeError, Result};

pub const CURRENT_VERSION: u32 = 2;
pub const SUPPORTED_VERSIONS: &[u32] = &[1, 2];

const PREFIX: &str = "cr";
const CHECKSUM_LEN: usize = 4;
const V1_SEPARATOR: char = '\0';

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    // The payload class is greedy, so whatever follows the match is already a delimiter
    Regex::new(r"(?:^|[^A-Za-z0-9_-])(cr[0-9]+_[A-Za-z0-9_-]+)").expect("token regex is valid")
});

#[derive(Serialize, Deserialize)]
struct PayloadV2 {
    p: String,
    b: Option<String>,
    c: Option<ConversationV2>,
}

#[derive(Serialize, Deserialize)]
struct ConversationV2 {
    e: String,
    i: String,
}

/// Encode a binding in the current token version.
pub fn encode(binding: &SessionBinding) -> String {
    encode_v2(binding)
}

/// Encode a binding in a specific version.
///
/// v1 cannot carry NUL bytes or a conversation with an empty engine/id.
pub fn encode_version(version: u32, binding: &SessionBinding) -> Result<String> {
    match version {
        1 => encode_v1(binding),
        2 => Ok(encode_v2(binding)),
        other => Err(BridgeError::UnsupportedVersion(other)),
    }
}

/// Decode any supported token version.
pub fn decode(token: &str) -> Result<SessionBinding> {
    let token = token.trim();
    let (version, payload) = split_token(token)?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| BridgeError::MalformedToken(format!("payload is not base64url: {}", e)))?;

    match version {
        1 => decode_v1(&bytes),
        2 => decode_v2(&bytes),
        other => Err(BridgeError::UnsupportedVersion(other)),
    }
}

/// Find a token pasted anywhere in a chat message.
///
/// Returns the token and the message with the token removed.
pub fn find_token(text: &str) -> Option<(String, String)> {
    let captures = TOKEN_RE.captures(text)?;
    let token = captures.get(1)?;
    let mut rest = String::with_capacity(text.len());
    rest.push_str(&text[..token.start()]);
    rest.push_str(&text[token.end()..]);
    Some((token.as_str().to_string(), rest.trim().to_string()))
}

fn split_token(token: &str) -> Result<(u32, &str)> {
    let rest = token
        .strip_prefix(PREFIX)
        .ok_or_else(|| BridgeError::MalformedToken("missing token prefix".to_string()))?;
    let (version, payload) = rest
        .split_once('_')
        .ok_or_else(|| BridgeError::MalformedToken("missing version separator".to_string()))?;

    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
        return Err(BridgeError::MalformedToken(format!(
            "bad version tag {:?}",
            version
        )));
    }
    let version: u32 = version
        .parse()
        .map_err(|_| BridgeError::MalformedToken(format!("bad version tag {:?}", version)))?;

    if payload.is_empty() {
        return Err(BridgeError::MalformedToken("empty payload".to_string()));
    }

    Ok((version, payload))
}

fn encode_v1(binding: &SessionBinding) -> Result<String> {
    let branch = binding.branch.as_ref().map(BranchName::as_str).unwrap_or("");
    let (engine, id) = match &binding.conversation {
        Some(conv) => {
            if conv.engine.is_empty() || conv.id.is_empty() {
                return Err(BridgeError::MalformedToken(
                    "v1 cannot carry an empty engine or conversation id".to_string(),
                ));
            }
            (conv.engine.as_str(), conv.id.as_str())
        }
        None => ("", ""),
    };

    let fields = [binding.project.as_str(), branch, engine, id];
    if fields.iter().any(|f| f.contains(V1_SEPARATOR)) {
        return Err(BridgeError::MalformedToken(
            "v1 cannot carry NUL bytes".to_string(),
        ));
    }

    let payload = fields.join(&V1_SEPARATOR.to_string());
    Ok(format!(
        "{}1_{}",
        PREFIX,
        URL_SAFE_NO_PAD.encode(seal(payload.into_bytes()))
    ))
}

fn decode_v1(bytes: &[u8]) -> Result<SessionBinding> {
    let payload = unseal(1, bytes)?;
    let text = std::str::from_utf8(payload)
        .map_err(|_| BridgeError::MalformedToken("v1 payload is not UTF-8".to_string()))?;
    let fields: Vec<&str> = text.split(V1_SEPARATOR).collect();
    let [project, branch, engine, id] = fields.as_slice() else {
        return Err(BridgeError::MalformedToken(format!(
            "v1 payload has {} fields, expected 4",
            fields.len()
        )));
    };

    let conversation = match (engine.is_empty(), id.is_empty()) {
        (true, true) => None,
        (false, false) => Some(ConversationRef::new(*engine, *id)),
        _ => {
            return Err(BridgeError::MalformedToken(
                "v1 conversation is half empty".to_string(),
            ));
        }
    };

    build_binding(project, (!branch.is_empty()).then_some(*branch), conversation)
}

fn encode_v2(binding: &SessionBinding) -> String {
    let payload = PayloadV2 {
        p: binding.project.as_str().to_string(),
        b: binding.branch.as_ref().map(|b| b.as_str().to_string()),
        c: binding.conversation.as_ref().map(|c| ConversationV2 {
            e: c.engine.clone(),
            i: c.id.clone(),
        }),
    };

    // Plain structs of strings always serialize
    let bytes = serde_json::to_vec(&payload).unwrap_or_default();
    format!("{}2_{}", PREFIX, URL_SAFE_NO_PAD.encode(seal(bytes)))
}

fn decode_v2(bytes: &[u8]) -> Result<SessionBinding> {
    let json = unseal(2, bytes)?;
    let payload: PayloadV2 = serde_json::from_slice(json)
        .map_err(|e| BridgeError::MalformedToken(format!("v2 payload: {}", e)))?;

    let conversation = payload.c.map(|c| ConversationRef::new(c.e, c.i));
    build_binding(&payload.p, payload.b.as_deref(), conversation)
}

/// Append the truncated SHA-256 of `payload`
fn seal(mut payload: Vec<u8>) -> Vec<u8> {
    let digest = Sha256::digest(&payload);
    payload.extend_from_slice(&digest[..CHECKSUM_LEN]);
    payload
}

/// Verify and strip the checksum appended by [`seal`]
fn unseal(version: u32, bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() <= CHECKSUM_LEN {
        return Err(BridgeError::MalformedToken(format!(
            "v{} payload too short",
            version
        )));
    }

    let (payload, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let digest = Sha256::digest(payload);
    if digest[..CHECKSUM_LEN] != *checksum {
        return Err(BridgeError::MalformedToken(
            "checksum mismatch".to_string(),
        ));
    }
    Ok(payload)
}

fn build_binding(
    project: &str,
    branch: Option<&str>,
    conversation: Option<ConversationRef>,
) -> Result<SessionBinding> {
    let project = ProjectName::new(project)
        .map_err(|e| BridgeError::MalformedToken(format!("project: {}", e)))?;
    let branch = branch
        .map(|b| {
            let parsed = BranchName::new(b)
                .map_err(|e| BridgeError::MalformedToken(format!("branch: {}", e)))?;
            // Validation trims; a token must carry the canonical form already
            if parsed.as_str() != b {
                return Err(BridgeError::MalformedToken(
                    "branch is not canonical".to_string(),
                ));
            }
            Ok(parsed)
        })
        .transpose()?;

    Ok(SessionBinding {
        project,
        branch,
        conversation,
    })
}

#[cfg(test)]
mod tests;
