use serde::{Deserialize, Serialize};

use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;

pub type TagId = TypedId<Tag>;

/// A voter label used here purely as an audience-selection predicate; tag
/// management itself lives with the voter CRUD surface, outside the engine.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Tag {
    #[serde(rename = "_id")]
    pub id: TagId,
    pub name: String,
    pub color: String,
    pub description: String,
}

impl TypedIdMarker for Tag {
    fn tag() -> &'static str {
        "TAG"
    }
}
