use chrono::Utc;

use crate::database::{Database, MongoDatabase};
use crate::error::Error;
use crate::optout::{OptOutId, OptOutMethod, OptOutRecord, OptOutScope};
use crate::recording::VoiceRecording;
use crate::tag::Tag;
use crate::voter::Voter;

/// Demo fixture for local development: a couple of tags, a handful of
/// voters around Birmingham, a robocall recording, and one opt-out.
/// Destructive; only wired up behind SEED_DEMO_DATA.
pub async fn seed(db: &MongoDatabase) -> Result<(), Error> {
    db.drop().await?;

    let volunteer_tag = "TAG-7D3A1C42-0B7E-4A7C-9A57-2E7B53A11D01".parse().unwrap();
    let yard_sign_tag = "TAG-4F9B6E15-6C2D-4D0A-8B3F-9D0C41E2AA02".parse().unwrap();
    let recording_id = "REC-A1B84D77-3E55-4F1B-B0C2-6F3A29C4EE03".parse().unwrap();

    let tags = vec![
        Tag {
            id: volunteer_tag,
            name: "Volunteer".to_string(),
            color: "#2a9d8f".to_string(),
            description: "Signed up to canvass or phone-bank".to_string(),
        },
        Tag {
            id: yard_sign_tag,
            name: "Yard Sign".to_string(),
            color: "#e76f51".to_string(),
            description: "Requested a yard sign".to_string(),
        },
    ];
    for tag in &tags {
        db.tags().insert_tag(tag).await?;
    }

    db.recordings()
        .insert_recording(&VoiceRecording {
            id: recording_id,
            name: "GOTV reminder".to_string(),
            url: "https://recordings.example.org/gotv-reminder.mp3".to_string(),
        })
        .await?;

    let voters = vec![
        (
            "VTR-0A11F2D3-44C5-46B7-88D9-E0F1A2B3C401",
            "Ada",
            "Pearson",
            Some("2055550101"),
            Some("ada@example.org"),
            "35201",
            vec![volunteer_tag],
        ),
        (
            "VTR-0B22E3C4-55D6-47A8-99EA-F1A2B3C4D502",
            "Ben",
            "Okafor",
            Some("2055550102"),
            None,
            "35201",
            vec![],
        ),
        (
            "VTR-0C33D4B5-66E7-48B9-AAFB-A2B3C4D5E603",
            "Carla",
            "Nguyen",
            Some("2055550103"),
            Some("carla@example.org"),
            "35201",
            vec![yard_sign_tag],
        ),
        (
            "VTR-0D44C5A6-77F8-49CA-BB0C-B3C4D5E6F704",
            "Dee",
            "Walker",
            None,
            Some("dee@example.org"),
            "35244",
            vec![volunteer_tag],
        ),
        (
            "VTR-0E55B697-8809-4ADB-CC1D-C4D5E6F7A805",
            "Eli",
            "Martins",
            Some("2055550105"),
            None,
            "35244",
            vec![],
        ),
        (
            "VTR-0F66A788-991A-4BEC-DD2E-D5E6F7A8B906",
            "Faye",
            "Hudson",
            Some("2055550106"),
            Some("faye@example.org"),
            "35244",
            vec![yard_sign_tag, volunteer_tag],
        ),
    ];
    for (id, first_name, last_name, phone, email, zip, tag_ids) in voters {
        db.voters()
            .insert_voter(&Voter {
                id: id.parse().unwrap(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                phone_number: phone.map(|p| p.to_string()),
                email: email.map(|e| e.to_string()),
                zip_code: Some(zip.to_string()),
                tag_ids,
            })
            .await?;
    }

    db.opt_outs()
        .insert_opt_out(&OptOutRecord {
            id: OptOutId::new(),
            phone_number: "+12055550105".to_string(),
            scope: OptOutScope::All,
            method: OptOutMethod::Phone,
            opted_out_at: Utc::now(),
            reason: Some("asked to be removed from all lists".to_string()),
            voter_id: Some("VTR-0E55B697-8809-4ADB-CC1D-C4D5E6F7A805".parse().unwrap()),
        })
        .await?;

    Ok(())
}
