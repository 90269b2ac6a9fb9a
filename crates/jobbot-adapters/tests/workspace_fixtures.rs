use std::path::PathBuf;

use chrono::Utc;
use jobbot_adapters::{
    parser_for_source, scrape_listings, ApplyOutcome, BrowserSession, FixtureSession, SearchTarget,
};
use jobbot_core::{ApplicationStatus, Listing, TrackerEntry};

fn fixtures_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

async fn scrape(session: &mut FixtureSession, source_id: &str) -> Vec<Listing> {
    let parser = parser_for_source(source_id).unwrap();
    let target = SearchTarget {
        source_id: source_id.to_string(),
        url: format!("https://{source_id}.example/search"),
    };
    scrape_listings(session, parser.as_ref(), &target)
        .await
        .unwrap()
        .into_iter()
        .map(|raw| Listing::from_raw(raw, Utc::now()).unwrap())
        .collect()
}

#[tokio::test]
async fn workspace_search_fixtures_parse_for_every_source() {
    let mut session = FixtureSession::new(fixtures_root());

    let linkedin = scrape(&mut session, "linkedin").await;
    assert_eq!(linkedin.len(), 4);
    assert_eq!(linkedin[0].id, "3791001");
    assert_eq!(linkedin[0].title, "Junior Python Developer");
    assert_eq!(linkedin[0].company, "Globex");

    let indeed = scrape(&mut session, "indeed").await;
    assert_eq!(indeed.len(), 2);
    assert_eq!(indeed[0].id, "a1b2c3d4");
    assert_eq!(indeed[1].company, "Vandelay Industries");

    let wellfound = scrape(&mut session, "wellfound").await;
    assert_eq!(wellfound.len(), 3);
    assert!(wellfound.iter().all(|l| l.url.starts_with("https://wellfound.com/jobs/")));
    assert_eq!(wellfound[2].company, "PCs for People");
}

#[tokio::test]
async fn workspace_apply_forms_separate_complete_and_incomplete() {
    let mut session = FixtureSession::new(fixtures_root());
    let listings = scrape(&mut session, "linkedin").await;
    let entry = |id: &str| {
        let listing = listings.iter().find(|l| l.id == id).unwrap();
        TrackerEntry::from_listing(listing, ApplicationStatus::ToApply, "")
    };

    let complete = session
        .submit_application(&entry("3791001"), "Dear Hiring Manager")
        .await
        .unwrap();
    assert_eq!(complete, ApplyOutcome::Submitted);

    let incomplete = session
        .submit_application(&entry("3791004"), "Dear Hiring Manager")
        .await
        .unwrap();
    assert!(matches!(incomplete, ApplyOutcome::Incomplete { .. }));

    assert!(session
        .submit_application(&entry("3791002"), "Dear Hiring Manager")
        .await
        .is_err());
    assert_eq!(session.submissions().len(), 1);
}
