//! Solicitation feeds: raw JSON records run through the program adapter's `normalize` and
//! stored as opportunities. Like CSV import, every record stands alone.

use fedbd_adapters::{AdapterError, ProgramRegistry};
use fedbd_core::ProgramCode;
use fedbd_storage::{InsertOutcome, NewOpportunity, PortalStore};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};

/// Keys a feed envelope may carry its record array under.
const ENVELOPE_KEYS: [&str; 3] = ["data", "results", "opportunities"];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("feed is not a JSON array of solicitation records")]
    NotAnArray,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub program: ProgramCode,
    pub imported: usize,
    pub total_records: usize,
    pub errors: Vec<String>,
}

/// The record array of a feed: either a bare array or an object wrapping one.
pub fn feed_records(payload: &JsonValue) -> Result<&[JsonValue], IngestError> {
    match payload {
        JsonValue::Array(items) => Ok(items),
        JsonValue::Object(map) => ENVELOPE_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(JsonValue::as_array))
            .map(Vec::as_slice)
            .ok_or(IngestError::NotAnArray),
        _ => Err(IngestError::NotAnArray),
    }
}

pub async fn ingest_solicitations(
    store: &PortalStore,
    registry: &ProgramRegistry,
    program: ProgramCode,
    payload: &JsonValue,
) -> Result<IngestSummary, IngestError> {
    let span = info_span!("solicitation_ingest", program = %program);
    async move {
        let adapter = registry.enabled_adapter(program)?;
        let records = feed_records(payload)?;

        let mut summary = IngestSummary {
            program,
            imported: 0,
            total_records: records.len(),
            errors: Vec::new(),
        };
        for (idx, raw) in records.iter().enumerate() {
            let n = idx + 1;
            let opp = match adapter.normalize(raw) {
                Ok(opp) => opp,
                Err(err) => {
                    summary.errors.push(format!("Record {n}: {err}"));
                    continue;
                }
            };
            let outcome = store
                .insert_opportunity(&NewOpportunity {
                    opp_no: opp.opp_no.clone(),
                    title: opp.title,
                    agency: opp.agency,
                    status: opp.status,
                    close_date: opp.close_date,
                    url: opp.url,
                    program_code: Some(program),
                    meta: opp.meta,
                })
                .await;
            match outcome {
                Ok(InsertOutcome::Inserted(_)) => summary.imported += 1,
                Ok(InsertOutcome::Duplicate) => summary
                    .errors
                    .push(format!("Record {n}: Opportunity {} already exists", opp.opp_no)),
                Err(err) => {
                    error!(record = n, error = %err, "solicitation insert failed");
                    summary.errors.push(format!("Record {n}: could not be saved"));
                }
            }
        }

        info!(
            imported = summary.imported,
            total_records = summary.total_records,
            errors = summary.errors.len(),
            "solicitation ingest finished"
        );
        Ok(summary)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[tokio::test]
    async fn raw_feed_records_are_normalized_and_stored_with_meta() {
        let store = PortalStore::in_memory().await.unwrap();
        let registry = ProgramRegistry::with_defaults();
        let feed = json!({
            "data": [
                {
                    "solicitation_number": "SPE8EJ-26-R-0042",
                    "title": "Night vision sustainment",
                    "response_date": "03/15/2026",
                    "region": "CONUS",
                    "set_aside": "Small business"
                },
                { "solicitation_number": "SPE8EJ-26-R-0043" },
                { "solicitation_number": "SPE8EJ-26-R-0042", "title": "Repost" }
            ]
        });

        let summary = ingest_solicitations(&store, &registry, ProgramCode::Tls, &feed)
            .await
            .unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.total_records, 3);
        assert_eq!(
            summary.errors,
            vec![
                "Record 2: missing required field `title` in raw solicitation".to_string(),
                "Record 3: Opportunity SPE8EJ-26-R-0042 already exists".to_string(),
            ]
        );

        let stored = store.opportunity_by_no("SPE8EJ-26-R-0042").await.unwrap().unwrap();
        assert_eq!(stored.title, "Night vision sustainment");
        assert_eq!(stored.agency, "DLA Troop Support");
        assert_eq!(stored.program_code, Some(ProgramCode::Tls));
        assert_eq!(stored.close_date, NaiveDate::from_ymd_opt(2026, 3, 15));
        assert_eq!(stored.meta.get("region").map(String::as_str), Some("CONUS"));
        assert_eq!(stored.meta.get("set_aside").map(String::as_str), Some("Small business"));
    }

    #[tokio::test]
    async fn disabled_programs_and_non_array_feeds_are_refused() {
        let store = PortalStore::in_memory().await.unwrap();
        let registry = ProgramRegistry::with_defaults();

        let err = ingest_solicitations(&store, &registry, ProgramCode::Sewp, &json!({ "rfq_id": "R-1" }))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotAnArray));

        registry.set_enabled(ProgramCode::Sewp, false);
        let err = ingest_solicitations(&store, &registry, ProgramCode::Sewp, &json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Adapter(AdapterError::Disabled(ProgramCode::Sewp))));
        assert_eq!(store.count_opportunities(None, None).await.unwrap(), 0);
    }
}
