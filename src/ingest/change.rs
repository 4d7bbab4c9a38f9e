use chrono::{DateTime, SubsecRound, Utc};

/// Outcome of comparing a channel's update time with an outlet's watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Reconcile the entries, then advance the watermark to `watermark`
    Ingest { watermark: DateTime<Utc> },
    /// Nothing new since the last pass
    Unchanged,
}

/// Decide whether an outlet needs a reconciliation pass.
///
/// A channel without an update time is treated as updated `now`, so such
/// feeds are re-examined on every pass and rely on URL uniqueness to avoid
/// duplicate articles. The comparison is strict: an equal timestamp means
/// unchanged.
pub fn evaluate(
    outlet_updated_at: Option<DateTime<Utc>>,
    channel_updated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Decision {
    let effective = channel_updated_at.unwrap_or_else(|| now.trunc_subsecs(0));

    match outlet_updated_at {
        Some(watermark) if effective <= watermark => Decision::Unchanged,
        _ => Decision::Ingest {
            watermark: effective,
        },
    }
}
