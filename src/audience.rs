use std::collections::{BTreeMap, HashSet};

use crate::campaign::{AudienceFilter, Channel};
use crate::database::Database;
use crate::error::Error;
use crate::optout;
use crate::voter::{Voter, VoterId};

/// A deliverable audience member: the voter plus the canonical address the
/// campaign's channel will use.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Recipient {
    pub voter_id: VoterId,
    pub address: String,
}

/// Resolve a targeting filter to the concrete recipient set.
///
/// Union semantics across the predicate families: anyone in a targeted zip
/// OR carrying a targeted tag. Then drop voters without a usable address
/// for the channel, voters with a covering opt-out, and (when requested)
/// voters already sent a byte-identical message on this channel. Output is
/// deduplicated and ordered by voter id, so the same filter over the same
/// data always yields the same list.
#[tracing::instrument(skip(db, message))]
pub async fn resolve(
    db: &dyn Database,
    filter: &AudienceFilter,
    channel: Channel,
    message: &str,
    prevent_duplicates: bool,
) -> Result<Vec<Recipient>, Error> {
    let mut voters: BTreeMap<VoterId, Voter> = BTreeMap::new();
    for zip_code in &filter.zip_codes {
        for voter in db.voters().fetch_voters_by_zip(zip_code).await? {
            voters.entry(voter.id).or_insert(voter);
        }
    }
    for tag_id in &filter.tag_ids {
        for voter in db.voters().fetch_voters_by_tag(*tag_id).await? {
            voters.entry(voter.id).or_insert(voter);
        }
    }

    let suppressed: HashSet<String> = if channel.honors_opt_out_registry() {
        db.opt_outs()
            .fetch_opt_outs_by_scopes(channel.opt_out_scopes())
            .await?
            .into_iter()
            .map(|opt_out| opt_out.phone_number)
            .collect()
    } else {
        HashSet::new()
    };

    let already_messaged: HashSet<VoterId> = if prevent_duplicates {
        let campaigns = db
            .campaigns()
            .fetch_campaigns_by_channel_and_message(channel, message)
            .await?;
        let campaign_ids: Vec<_> = campaigns.into_iter().map(|c| c.id).collect();
        db.deliveries()
            .fetch_sent_voter_ids(&campaign_ids)
            .await?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    let recipients = voters
        .into_values()
        .filter_map(|voter| {
            let address = deliverable_address(&voter, channel)?;
            if suppressed.contains(&address) {
                return None;
            }
            if already_messaged.contains(&voter.id) {
                return None;
            }
            Some(Recipient {
                voter_id: voter.id,
                address,
            })
        })
        .collect();

    Ok(recipients)
}

/// Side-effect-free audience size estimate for the pre-send preview.
#[tracing::instrument(skip(db, message))]
pub async fn preview_count(
    db: &dyn Database,
    filter: &AudienceFilter,
    channel: Channel,
    message: &str,
    prevent_duplicates: bool,
) -> Result<usize, Error> {
    Ok(resolve(db, filter, channel, message, prevent_duplicates)
        .await?
        .len())
}

fn deliverable_address(voter: &Voter, channel: Channel) -> Option<String> {
    match channel {
        Channel::Sms | Channel::RoboCall => voter
            .phone_number
            .as_deref()
            .and_then(|phone| optout::normalize_phone(phone).ok()),
        Channel::Email => voter.email.clone().filter(|email| email.contains('@')),
    }
}
