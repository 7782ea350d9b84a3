use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest};
use serde::{Deserialize, Serialize};

use crate::error::Error;

use crate::typedid::{TypedId, TypedIdMarker};

pub type ActorId = TypedId<Actor>;

const ACTOR_ID_HEADER: &str = "X-Actor-Id";
const ACTOR_ROLE_HEADER: &str = "X-Actor-Role";

/// The verified caller, as attested by the upstream auth layer. The engine
/// never authenticates; it only enforces role and ownership rules.
#[derive(Clone, Copy, Debug)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl TypedIdMarker for Actor {
    fn tag() -> &'static str {
        "ACT"
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Role {
    Admin,
    SuperAdmin,
}

impl Actor {
    pub fn from_headers(headers: &HeaderMap) -> Result<Actor, Error> {
        let id = headers
            .get(ACTOR_ID_HEADER)
            .ok_or(Error::MissingActorContext)?
            .to_str()
            .map_err(|_| Error::InvalidActorContext)?
            .parse()
            .map_err(|_| Error::InvalidActorContext)?;

        let role = match headers
            .get(ACTOR_ROLE_HEADER)
            .ok_or(Error::MissingActorContext)?
            .to_str()
            .map_err(|_| Error::InvalidActorContext)?
        {
            "ADMIN" => Role::Admin,
            "SUPER-ADMIN" => Role::SuperAdmin,
            _ => return Err(Error::InvalidActorContext),
        };

        Ok(Actor { id, role })
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn require_super_admin(&self, action: &'static str) -> Result<(), Error> {
        if self.is_super_admin() {
            Ok(())
        } else {
            Err(Error::NotAuthorized { action })
        }
    }

    /// Ownership rule: a SuperAdmin manages any campaign, an Admin only
    /// their own.
    pub fn owns_or_super_admin(&self, created_by: ActorId) -> bool {
        self.is_super_admin() || self.id == created_by
    }
}

impl FromRequest for Actor {
    type Error = Error;
    type Future = Ready<Result<Actor, Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Actor::from_headers(req.headers()))
    }
}
