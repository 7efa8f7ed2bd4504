use serde::{Deserialize, Serialize};

/// Body of `POST /offer`: a browser-originated WebRTC SDP offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Response to `POST /offer`: the gateway's SDP answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AnswerResponse {
    pub fn new(sdp: String) -> Self {
        Self {
            sdp,
            kind: "answer".to_string(),
        }
    }
}
