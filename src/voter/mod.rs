use serde::{Deserialize, Serialize};

use crate::tag::TagId;
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type VoterId = TypedId<Voter>;

/// Read-side projection of the voter directory. The engine never writes
/// voters; import, geocoding, and CRUD belong to the surrounding console.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: VoterId,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub zip_code: Option<String>,
    pub tag_ids: Vec<TagId>,
}

impl TypedIdMarker for Voter {
    fn tag() -> &'static str {
        "VTR"
    }
}
