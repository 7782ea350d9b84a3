use std::fmt::{Debug, Display};
use std::io::Error as IoError;

use actix_web::error::{JsonPayloadError, PathError, QueryPayloadError, UrlencodedError};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use derivative::Derivative;
use mongodb::bson::ser::Error as BsonError;
use mongodb::error::Error as DatabaseError;
use serde::{Serialize, Serializer};

use crate::campaign::{CampaignId, CampaignStatus, Channel};
use crate::optout::OptOutScope;
use crate::recording::VoiceRecordingId;
use crate::tag::TagId;

#[derive(Debug, Serialize, Derivative)]
#[derivative(PartialEq, Eq)]
#[serde(untagged)]
pub enum Error {
    // 400
    #[serde(serialize_with = "display")]
    InvalidJson(#[derivative(PartialEq = "ignore")] JsonPayloadError),
    #[serde(serialize_with = "display")]
    InvalidPath(#[derivative(PartialEq = "ignore")] PathError),
    #[serde(serialize_with = "display")]
    InvalidForm(#[derivative(PartialEq = "ignore")] UrlencodedError),
    #[serde(serialize_with = "display")]
    InvalidQuery(#[derivative(PartialEq = "ignore")] QueryPayloadError),
    CampaignNameEmpty,
    MessageEmpty {
        channel: Channel,
    },
    MessageTooLong {
        length: usize,
        maximum: usize,
    },
    EmailContentMissing,
    AudienceFilterEmpty,
    InvalidCallingHours {
        start_hour: u32,
        end_hour: u32,
    },
    ScheduledTimeNotInFuture {
        scheduled_time: DateTime<Utc>,
    },
    InvalidPhoneNumber {
        phone_number: String,
    },
    InvalidQueryValue {
        field: &'static str,
        value: String,
    },
    InvalidActorContext,

    // 401
    MissingActorContext,

    // 403
    NotAuthorized {
        action: &'static str,
    },

    // 404
    PathNotFound,
    CampaignNotFound {
        campaign_id: CampaignId,
    },
    VoiceRecordingNotFound {
        recording_id: VoiceRecordingId,
    },
    TagNotFound {
        tag_id: TagId,
    },
    OptOutNotFound {
        phone_number: String,
        scope: OptOutScope,
    },

    // 409
    ConcurrentModificationDetected,
    InvalidStatusTransition {
        campaign_id: CampaignId,
        status: CampaignStatus,
        action: &'static str,
    },
    CampaignNotEditable {
        campaign_id: CampaignId,
    },
    NoFailedDeliveries {
        campaign_id: CampaignId,
    },
    AudienceResolvedEmpty {
        campaign_id: CampaignId,
    },
    OptOutAlreadyExists {
        phone_number: String,
        scope: OptOutScope,
    },

    // 500
    #[serde(serialize_with = "display")]
    FailedDatabaseCall(#[derivative(PartialEq = "ignore")] DatabaseError),
    #[serde(serialize_with = "display")]
    FailedToSerializeToBson(#[derivative(PartialEq = "ignore")] BsonError),
    #[serde(serialize_with = "display")]
    IoError(#[derivative(PartialEq = "ignore")] IoError),
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "E4001000",
            Error::InvalidPath(_) => "E4001001",
            Error::InvalidForm(_) => "E4001002",
            Error::InvalidQuery(_) => "E4001003",
            Error::CampaignNameEmpty => "E4002000",
            Error::MessageEmpty { .. } => "E4002001",
            Error::MessageTooLong { .. } => "E4002002",
            Error::EmailContentMissing => "E4002003",
            Error::AudienceFilterEmpty => "E4002004",
            Error::InvalidCallingHours { .. } => "E4002005",
            Error::ScheduledTimeNotInFuture { .. } => "E4002006",
            Error::InvalidPhoneNumber { .. } => "E4002007",
            Error::InvalidQueryValue { .. } => "E4002008",
            Error::InvalidActorContext => "E4002009",
            Error::MissingActorContext => "E4011000",
            Error::NotAuthorized { .. } => "E4031000",
            Error::PathNotFound => "E4041000",
            Error::CampaignNotFound { .. } => "E4041001",
            Error::VoiceRecordingNotFound { .. } => "E4041002",
            Error::TagNotFound { .. } => "E4041003",
            Error::OptOutNotFound { .. } => "E4041004",
            Error::ConcurrentModificationDetected => "E4091000",
            Error::InvalidStatusTransition { .. } => "E4091001",
            Error::CampaignNotEditable { .. } => "E4091002",
            Error::NoFailedDeliveries { .. } => "E4091003",
            Error::AudienceResolvedEmpty { .. } => "E4091004",
            Error::OptOutAlreadyExists { .. } => "E4091005",
            Error::FailedDatabaseCall(_) => "E5001000",
            Error::FailedToSerializeToBson(_) => "E5001001",
            Error::IoError(_) => "E5001002",
        }
    }

    pub fn error_message(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "The given json could not be parsed",
            Error::InvalidPath(_) => "The given path could not be parsed",
            Error::InvalidForm(_) => "The given form could not be parsed",
            Error::InvalidQuery(_) => "The given query could not be parsed",
            Error::CampaignNameEmpty => "The campaign name must not be empty",
            Error::MessageEmpty { .. } => {
                "The requested channel requires a non-empty message body"
            }
            Error::MessageTooLong { .. } => "The message body exceeds the maximum length",
            Error::EmailContentMissing => {
                "Email campaigns require a subject and an html body"
            }
            Error::AudienceFilterEmpty => {
                "The campaign must target at least one zip code or tag"
            }
            Error::InvalidCallingHours { .. } => {
                "The calling-hours window must satisfy 0 <= start < end <= 24"
            }
            Error::ScheduledTimeNotInFuture { .. } => {
                "The scheduled time must be in the future"
            }
            Error::InvalidPhoneNumber { .. } => {
                "The given phone number could not be normalized"
            }
            Error::InvalidQueryValue { .. } => "A query parameter could not be parsed",
            Error::InvalidActorContext => "The actor headers could not be parsed",
            Error::MissingActorContext => "The request carries no actor headers",
            Error::NotAuthorized { .. } => {
                "The requested action is not permitted for this actor"
            }
            Error::PathNotFound => "The requested path was not found",
            Error::CampaignNotFound { .. } => "The requested campaign was not found",
            Error::VoiceRecordingNotFound { .. } => {
                "The referenced voice recording was not found"
            }
            Error::TagNotFound { .. } => "The referenced tag was not found",
            Error::OptOutNotFound { .. } => "The requested opt-out record was not found",
            Error::ConcurrentModificationDetected => {
                "The server detected a concurrent modification"
            }
            Error::InvalidStatusTransition { .. } => {
                "The requested action is not valid for the campaign's current status"
            }
            Error::CampaignNotEditable { .. } => {
                "Only a draft campaign with no recipients may be edited"
            }
            Error::NoFailedDeliveries { .. } => {
                "The requested campaign has no failed deliveries to retry"
            }
            Error::AudienceResolvedEmpty { .. } => {
                "The campaign's audience resolved to zero deliverable recipients"
            }
            Error::OptOutAlreadyExists { .. } => {
                "An active opt-out already exists for this phone number and scope"
            }
            Error::FailedDatabaseCall(_) => {
                "An error occurred when communicating with the database"
            }
            Error::FailedToSerializeToBson(_) => {
                "An error occurred when serializing an object to bson"
            }
            Error::IoError(_) => "An error occurred during an I/O operation",
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidJson(_)
            | Error::InvalidPath(_)
            | Error::InvalidForm(_)
            | Error::InvalidQuery(_)
            | Error::CampaignNameEmpty
            | Error::MessageEmpty { .. }
            | Error::MessageTooLong { .. }
            | Error::EmailContentMissing
            | Error::AudienceFilterEmpty
            | Error::InvalidCallingHours { .. }
            | Error::ScheduledTimeNotInFuture { .. }
            | Error::InvalidPhoneNumber { .. }
            | Error::InvalidQueryValue { .. }
            | Error::InvalidActorContext => StatusCode::BAD_REQUEST,
            Error::MissingActorContext => StatusCode::UNAUTHORIZED,
            Error::NotAuthorized { .. } => StatusCode::FORBIDDEN,
            Error::PathNotFound
            | Error::CampaignNotFound { .. }
            | Error::VoiceRecordingNotFound { .. }
            | Error::TagNotFound { .. }
            | Error::OptOutNotFound { .. } => StatusCode::NOT_FOUND,
            Error::ConcurrentModificationDetected
            | Error::InvalidStatusTransition { .. }
            | Error::CampaignNotEditable { .. }
            | Error::NoFailedDeliveries { .. }
            | Error::AudienceResolvedEmpty { .. }
            | Error::OptOutAlreadyExists { .. } => StatusCode::CONFLICT,
            Error::FailedDatabaseCall(_)
            | Error::FailedToSerializeToBson(_)
            | Error::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        #[derive(Serialize)]
        struct Dummy<'a> {
            error_code: &'static str,
            error_message: &'static str,
            error_meta: &'a Error,
        }

        HttpResponse::build(self.status_code()).json(&Dummy {
            error_code: self.error_code(),
            error_message: self.error_message(),
            error_meta: self,
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        Debug::fmt(self, f)
    }
}

impl From<DatabaseError> for Error {
    fn from(error: DatabaseError) -> Error {
        Error::FailedDatabaseCall(error)
    }
}

impl From<BsonError> for Error {
    fn from(error: BsonError) -> Error {
        Error::FailedToSerializeToBson(error)
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidJson(err) => Some(err),
            Error::InvalidPath(err) => Some(err),
            Error::InvalidForm(err) => Some(err),
            Error::InvalidQuery(err) => Some(err),
            Error::FailedDatabaseCall(err) => Some(err),
            Error::FailedToSerializeToBson(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

fn display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    serializer.collect_str(value)
}
