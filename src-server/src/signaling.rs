//! Session-description exchange surface.
//!
//! The HTTPS layer (external to this crate) authenticates the client and
//! hands the offer body here; the reply is the answer body to return.
//! Browsers negotiating DTLS expect the server to take the active role,
//! so `a=setup:actpass` is rewritten before the answer leaves.

use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum accepted body and SDP length.
pub const MAX_SDP_BYTES: usize = 65_536;

#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

/// Why an offer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    PayloadTooLarge,
    InvalidOffer,
    AnswerFailed,
}

impl OfferError {
    /// HTTP status the signaling layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            OfferError::PayloadTooLarge => 413,
            OfferError::InvalidOffer => 400,
            OfferError::AnswerFailed => 500,
        }
    }
}

/// Process one `/api/offer` body and produce the answer body.
pub fn handle_offer(transport: &Transport, body: &str) -> Result<String, OfferError> {
    if body.len() > MAX_SDP_BYTES {
        warn!("Offer payload too large: {} bytes", body.len());
        return Err(OfferError::PayloadTooLarge);
    }

    let request: OfferRequest = serde_json::from_str(body).map_err(|e| {
        warn!("Offer JSON parse error: {}", e);
        OfferError::InvalidOffer
    })?;
    if request.sdp.is_empty() || request.sdp.len() > MAX_SDP_BYTES {
        warn!("Offer SDP invalid size: {}", request.sdp.len());
        return Err(OfferError::InvalidOffer);
    }
    debug!("WebRTC offer received ({} bytes)", request.sdp.len());

    transport.set_remote(&request.sdp, &request.sdp_type);
    let answer = transport.get_local();
    if answer.is_empty() {
        return Err(OfferError::AnswerFailed);
    }

    let response = AnswerResponse {
        sdp: rewrite_setup_role(&answer),
        sdp_type: "answer".to_string(),
    };
    serde_json::to_string(&response).map_err(|_| OfferError::AnswerFailed)
}

/// Replace the first `a=setup:actpass` with `a=setup:active`.
fn rewrite_setup_role(sdp: &str) -> String {
    sdp.replacen("a=setup:actpass", "a=setup:active", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_role_rewrite() {
        let sdp = "v=0\r\na=setup:actpass\r\na=mid:0\r\n";
        assert_eq!(rewrite_setup_role(sdp), "v=0\r\na=setup:active\r\na=mid:0\r\n");
    }

    #[test]
    fn test_rewrite_only_first_occurrence() {
        let sdp = "a=setup:actpass\r\na=setup:actpass\r\n";
        let out = rewrite_setup_role(sdp);
        assert_eq!(out.matches("a=setup:active").count(), 1);
        assert_eq!(out.matches("a=setup:actpass").count(), 1);
    }

    #[test]
    fn test_rewrite_absent_passthrough() {
        let sdp = "v=0\r\na=setup:passive\r\n";
        assert_eq!(rewrite_setup_role(sdp), sdp);
    }

    #[test]
    fn test_offer_request_parse() {
        let req: OfferRequest =
            serde_json::from_str(r#"{"sdp": "v=0", "type": "offer"}"#).unwrap();
        assert_eq!(req.sdp, "v=0");
        assert_eq!(req.sdp_type, "offer");
    }

    #[test]
    fn test_answer_serializes_with_type_field() {
        let json = serde_json::to_string(&AnswerResponse {
            sdp: "v=0".into(),
            sdp_type: "answer".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"answer""#));
        assert!(json.contains(r#""sdp":"v=0""#));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(OfferError::PayloadTooLarge.status(), 413);
        assert_eq!(OfferError::InvalidOffer.status(), 400);
        assert_eq!(OfferError::AnswerFailed.status(), 500);
    }
}
