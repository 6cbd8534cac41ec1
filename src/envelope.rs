//! Wire codec for signaling envelopes.
//!
//! Every frame on the signaling channel is one JSON object. Inbound messages
//! from the rendezvous server carry a `type` discriminator (except the
//! endpoint assignment); outbound descriptions and candidates are told apart
//! by which payload field is present.
//!
//! ```text
//! {"client_id": "..."}                                   EndpointAssigned
//! {"type":"new_call","call_id":..,"offer":..}            IncomingOffer
//! {"type":"call_answered","call_id":..,"answer":..}      Answered
//! {"type":"ice_candidate","call_id":..,"candidate":..}   RemoteCandidate
//! {"type":"call_ended","call_id":..}                     Ended
//! {"type":"call_taken","call_id":..}                     Claimed
//! {"call_id":..,"offer":..}                              OutgoingOffer
//! {"call_id":..,"answer":..}                             OutgoingAnswer
//! {"call_id":..,"candidate":..}                          LocalCandidate
//! {"call_id":..,"type":"end_call"}                       EndCall
//! ```

use crate::types::call::{CallId, IceCandidate, SessionDescription};
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope is not a json object")]
    NotAnObject,

    #[error("unknown envelope type: {0}")]
    UnknownType(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unexpected field: {0}")]
    UnexpectedField(String),

    #[error("invalid value for field: {0}")]
    InvalidField(&'static str),

    #[error("unrecognized envelope shape")]
    UnrecognizedShape,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    EndpointAssigned {
        endpoint_id: String,
    },
    IncomingOffer {
        call_id: CallId,
        offer: SessionDescription,
    },
    Answered {
        call_id: CallId,
        answer: SessionDescription,
    },
    RemoteCandidate {
        call_id: CallId,
        candidate: IceCandidate,
    },
    Ended {
        call_id: CallId,
    },
    Claimed {
        call_id: CallId,
    },
    OutgoingOffer {
        call_id: CallId,
        offer: SessionDescription,
    },
    OutgoingAnswer {
        call_id: CallId,
        answer: SessionDescription,
    },
    LocalCandidate {
        call_id: CallId,
        candidate: IceCandidate,
    },
    EndCall {
        call_id: CallId,
    },
}

impl Envelope {
    /// The call this envelope refers to. `None` only for `EndpointAssigned`.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::EndpointAssigned { .. } => None,
            Self::IncomingOffer { call_id, .. }
            | Self::Answered { call_id, .. }
            | Self::RemoteCandidate { call_id, .. }
            | Self::Ended { call_id }
            | Self::Claimed { call_id }
            | Self::OutgoingOffer { call_id, .. }
            | Self::OutgoingAnswer { call_id, .. }
            | Self::LocalCandidate { call_id, .. }
            | Self::EndCall { call_id } => Some(call_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::EndpointAssigned { .. } => "endpoint_assigned",
            Self::IncomingOffer { .. } => "new_call",
            Self::Answered { .. } => "call_answered",
            Self::RemoteCandidate { .. } => "ice_candidate",
            Self::Ended { .. } => "call_ended",
            Self::Claimed { .. } => "call_taken",
            Self::OutgoingOffer { .. } => "offer",
            Self::OutgoingAnswer { .. } => "answer",
            Self::LocalCandidate { .. } => "candidate",
            Self::EndCall { .. } => "end_call",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::EndpointAssigned { endpoint_id } => json!({ "client_id": endpoint_id }),
            Self::IncomingOffer { call_id, offer } => {
                json!({ "type": "new_call", "call_id": call_id, "offer": offer })
            }
            Self::Answered { call_id, answer } => {
                json!({ "type": "call_answered", "call_id": call_id, "answer": answer })
            }
            Self::RemoteCandidate { call_id, candidate } => {
                json!({ "type": "ice_candidate", "call_id": call_id, "candidate": candidate })
            }
            Self::Ended { call_id } => json!({ "type": "call_ended", "call_id": call_id }),
            Self::Claimed { call_id } => json!({ "type": "call_taken", "call_id": call_id }),
            Self::OutgoingOffer { call_id, offer } => json!({ "call_id": call_id, "offer": offer }),
            Self::OutgoingAnswer { call_id, answer } => {
                json!({ "call_id": call_id, "answer": answer })
            }
            Self::LocalCandidate { call_id, candidate } => {
                json!({ "call_id": call_id, "candidate": candidate })
            }
            Self::EndCall { call_id } => json!({ "call_id": call_id, "type": "end_call" }),
        }
    }

    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut fields) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => Some(kind),
            Some(_) => return Err(EnvelopeError::InvalidField("type")),
            None => None,
        };

        let envelope = match kind.as_deref() {
            None if fields.contains_key("client_id") => {
                let endpoint_id = match take(&mut fields, "client_id")? {
                    Value::String(id) => id,
                    Value::Number(n) => n.to_string(),
                    _ => return Err(EnvelopeError::InvalidField("client_id")),
                };
                Self::EndpointAssigned { endpoint_id }
            }
            None if fields.contains_key("offer") => Self::OutgoingOffer {
                call_id: take_call_id(&mut fields)?,
                offer: SessionDescription(take(&mut fields, "offer")?),
            },
            None if fields.contains_key("answer") => Self::OutgoingAnswer {
                call_id: take_call_id(&mut fields)?,
                answer: SessionDescription(take(&mut fields, "answer")?),
            },
            None if fields.contains_key("candidate") => Self::LocalCandidate {
                call_id: take_call_id(&mut fields)?,
                candidate: IceCandidate(take(&mut fields, "candidate")?),
            },
            None => return Err(EnvelopeError::UnrecognizedShape),
            Some("new_call") => Self::IncomingOffer {
                call_id: take_call_id(&mut fields)?,
                offer: SessionDescription(take(&mut fields, "offer")?),
            },
            Some("call_answered") => Self::Answered {
                call_id: take_call_id(&mut fields)?,
                answer: SessionDescription(take(&mut fields, "answer")?),
            },
            Some("ice_candidate") => Self::RemoteCandidate {
                call_id: take_call_id(&mut fields)?,
                candidate: IceCandidate(take(&mut fields, "candidate")?),
            },
            Some("call_ended") => Self::Ended {
                call_id: take_call_id(&mut fields)?,
            },
            Some("call_taken") => Self::Claimed {
                call_id: take_call_id(&mut fields)?,
            },
            Some("end_call") => Self::EndCall {
                call_id: take_call_id(&mut fields)?,
            },
            Some(other) => return Err(EnvelopeError::UnknownType(other.to_string())),
        };

        if let Some(extra) = fields.keys().next() {
            return Err(EnvelopeError::UnexpectedField(extra.clone()));
        }
        Ok(envelope)
    }
}

fn take(fields: &mut Map<String, Value>, name: &'static str) -> Result<Value, EnvelopeError> {
    match fields.remove(name) {
        Some(Value::Null) | None => Err(EnvelopeError::MissingField(name)),
        Some(value) => Ok(value),
    }
}

// Some server paths emit numeric ids; they are kept in decimal form.
fn take_call_id(fields: &mut Map<String, Value>) -> Result<CallId, EnvelopeError> {
    match take(fields, "call_id")? {
        Value::String(id) => Ok(CallId::new(id)),
        Value::Number(n) if n.is_u64() || n.is_i64() => Ok(CallId::new(n.to_string())),
        _ => Err(EnvelopeError::InvalidField("call_id")),
    }
}
