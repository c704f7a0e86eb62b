// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against an in-process engine and a scripted
//! upstream provider.

use std::time::Duration;

use vinhub::error::{FetchErrorKind, LimitKind};
use vinhub::{EventKind, Submitted};

use vinhub_specs::{percent_of, target, wait_for_event, Harness, Scripted, VIN};

const WAIT: Duration = Duration::from_secs(10);

// -- S1: happy path -----------------------------------------------------------

#[tokio::test]
async fn happy_path_commits_one_credit() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    let ack = h.engine.submit(h.job("u1", VIN, target(1))).await?;
    assert!(matches!(ack, Submitted::Registered { .. }));

    let succeeded = wait_for_event(&mut events, WAIT, |e| {
        matches!(e.kind, EventKind::ReportSucceeded { .. })
    })
    .await;
    let Some(event) = succeeded else {
        anyhow::bail!("run never succeeded");
    };
    assert_eq!(event.kind, EventKind::ReportSucceeded { remaining: Some(499) });

    assert_eq!(h.upstream.hits(), 1);

    let user = h.user("u1").await?;
    assert_eq!(user.daily_used, 1);
    assert_eq!(user.monthly_used, 1);
    assert_eq!(user.total_reports, 1);

    let delivered = h.port.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].1.contains(VIN));
    assert!(delivered[0].2 > 0);

    // Terminal frame: 100% plus the success note, after monotonic progress.
    let frames = h.port.frames_for(target(1));
    let last = frames.last().map(String::as_str).unwrap_or("");
    assert_eq!(percent_of(last), 100);
    let percents: Vec<u32> = frames.iter().map(|f| percent_of(f)).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "not monotonic: {percents:?}");
    Ok(())
}

// -- S2: duplicate within TTL -------------------------------------------------

#[tokio::test]
async fn duplicate_submission_coalesces_onto_one_fetch() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    h.upstream.enqueue(Scripted::PdfAfter(Duration::from_millis(400)));

    let first = h.engine.submit(h.job("u1", VIN, target(1))).await?;
    assert!(matches!(first, Submitted::Registered { .. }));

    let second = h.engine.submit(h.job("u1", VIN, target(2))).await?;
    assert_eq!(second, Submitted::Attached);

    wait_for_event(&mut events, WAIT, |e| {
        matches!(e.kind, EventKind::ReportSucceeded { .. })
    })
    .await
    .ok_or_else(|| anyhow::anyhow!("run never succeeded"))?;

    assert_eq!(h.upstream.hits(), 1, "duplicate must not refetch");

    let user = h.user("u1").await?;
    assert_eq!(user.monthly_used, 1, "exactly one charge for both subscribers");

    // Both subscribers end at 100%.
    for t in [target(1), target(2)] {
        let frames = h.port.frames_for(t);
        let last = frames.last().map(String::as_str).unwrap_or("");
        assert_eq!(percent_of(last), 100, "terminal frame missing for {t:?}");
    }
    Ok(())
}

#[tokio::test]
async fn subscribe_joins_inflight_run() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    h.upstream.enqueue(Scripted::PdfAfter(Duration::from_millis(400)));
    h.engine.submit(h.job("u1", VIN, target(1))).await?;

    assert!(h.engine.subscribe("u1", VIN, target(9)));

    wait_for_event(&mut events, WAIT, |e| {
        matches!(e.kind, EventKind::ReportSucceeded { .. })
    })
    .await
    .ok_or_else(|| anyhow::anyhow!("run never succeeded"))?;

    let frames = h.port.frames_for(target(9));
    assert_eq!(percent_of(frames.last().map(String::as_str).unwrap_or("")), 100);
    Ok(())
}

// -- S3: 5xx then success -----------------------------------------------------

#[tokio::test]
async fn upstream_503_retries_then_succeeds() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    h.upstream.enqueue(Scripted::Status(503));

    h.engine.submit(h.job("u1", VIN, target(1))).await?;

    let event = wait_for_event(&mut events, WAIT, |e| {
        matches!(e.kind, EventKind::ReportSucceeded { .. })
    })
    .await
    .ok_or_else(|| anyhow::anyhow!("run never succeeded"))?;
    assert_eq!(event.kind, EventKind::ReportSucceeded { remaining: Some(499) });

    assert_eq!(h.upstream.hits(), 2, "exactly one retry");

    let user = h.user("u1").await?;
    assert_eq!(user.monthly_used, 1);
    Ok(())
}

// -- S4: invalid VIN ----------------------------------------------------------

#[tokio::test]
async fn upstream_invalid_vin_refunds_without_retry() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    h.upstream.enqueue(Scripted::InvalidVin);

    // 17 characters of valid grammar the provider rejects.
    let bad_vin = "11111111111111111";
    h.engine.submit(h.job("u1", bad_vin, target(1))).await?;

    let failed = wait_for_event(&mut events, WAIT, |e| {
        matches!(e.kind, EventKind::ReportFailed { .. })
    })
    .await
    .ok_or_else(|| anyhow::anyhow!("no failure event"))?;
    assert_eq!(failed.kind, EventKind::ReportFailed { reason: FetchErrorKind::InvalidVin });

    wait_for_event(&mut events, WAIT, |e| matches!(e.kind, EventKind::ReportRefunded))
        .await
        .ok_or_else(|| anyhow::anyhow!("no refund event"))?;

    assert_eq!(h.upstream.hits(), 1, "permanent failures must not retry");

    let user = h.user("u1").await?;
    assert_eq!(user.daily_used, 0);
    assert_eq!(user.monthly_used, 0);

    let frames = h.port.frames_for(target(1));
    let last = frames.last().map(String::as_str).unwrap_or("");
    assert_eq!(percent_of(last), 100);
    assert!(last.contains(&vinhub::catalog::t("report.error.invalid_vin", "en")));
    assert!(last.contains(&vinhub::catalog::t("report.note.refund", "en")));
    Ok(())
}

// -- S5: daily cap ------------------------------------------------------------

#[tokio::test]
async fn daily_cap_rejects_before_reserving() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.activate("u1", 2, 0).await?;
    let mut events = h.engine.events();

    // Use up the day's budget.
    h.engine.ledger().reserve("u1", "used-1").await?;
    h.engine.ledger().reserve("u1", "used-2").await?;

    let ack = h.engine.submit(h.job("u1", VIN, target(1))).await?;
    let Submitted::Rejected { reason } = ack else {
        anyhow::bail!("expected rejection, got {ack:?}");
    };
    assert_eq!(reason, vinhub::catalog::t("limit.daily", "en"));

    let limit = wait_for_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e.kind, EventKind::LimitReached { .. })
    })
    .await
    .ok_or_else(|| anyhow::anyhow!("no limit event"))?;
    assert_eq!(limit.kind, EventKind::LimitReached { kind: LimitKind::Daily });

    assert_eq!(h.upstream.hits(), 0);
    let user = h.user("u1").await?;
    assert_eq!(user.daily_used, 2, "counters unchanged by the rejection");
    Ok(())
}

// -- S6: global gate ----------------------------------------------------------

#[tokio::test]
async fn global_gate_bounds_concurrent_fetches() -> anyhow::Result<()> {
    let h = Harness::start_with(|config| {
        config.global_concurrency = 2;
        config.per_user_concurrency = 2;
    })
    .await?;
    let mut events = h.engine.events();

    for user in ["u1", "u2", "u3"] {
        h.activate(user, 25, 500).await?;
        h.upstream.enqueue(Scripted::PdfAfter(Duration::from_millis(300)));
    }

    h.engine.submit(h.job("u1", VIN, target(1))).await?;
    h.engine.submit(h.job("u2", VIN, target(2))).await?;
    h.engine.submit(h.job("u3", VIN, target(3))).await?;

    let mut succeeded = 0;
    while succeeded < 3 {
        wait_for_event(&mut events, WAIT, |e| {
            matches!(e.kind, EventKind::ReportSucceeded { .. })
        })
        .await
        .ok_or_else(|| anyhow::anyhow!("only {succeeded} runs succeeded"))?;
        succeeded += 1;
    }

    assert_eq!(h.upstream.hits(), 3);
    assert!(
        h.upstream.max_concurrent() <= 2,
        "gate leaked: {} concurrent fetches",
        h.upstream.max_concurrent()
    );

    for user in ["u1", "u2", "u3"] {
        assert_eq!(h.user(user).await?.monthly_used, 1);
    }
    Ok(())
}

// -- Delivery failures --------------------------------------------------------

#[tokio::test]
async fn partial_delivery_still_commits() -> anyhow::Result<()> {
    let h = Harness::start_with(|config| config.delivery_retries = 1).await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    h.upstream.enqueue(Scripted::PdfAfter(Duration::from_millis(300)));
    h.engine.submit(h.job("u1", VIN, target(1))).await?;
    h.engine.submit(h.job("u1", VIN, target(2))).await?;

    // First delivery attempt (primary) fails; the secondary's succeeds.
    h.port.fail_next_deliveries(1);

    wait_for_event(&mut events, WAIT, |e| {
        matches!(e.kind, EventKind::ReportSucceeded { .. })
    })
    .await
    .ok_or_else(|| anyhow::anyhow!("partial delivery should still commit"))?;

    assert_eq!(h.port.delivered().len(), 1);
    assert_eq!(h.user("u1").await?.monthly_used, 1);
    Ok(())
}

#[tokio::test]
async fn total_delivery_failure_refunds() -> anyhow::Result<()> {
    let h = Harness::start_with(|config| config.delivery_retries = 1).await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    h.upstream.enqueue(Scripted::PdfAfter(Duration::from_millis(200)));
    h.port.fail_next_deliveries(10);
    h.engine.submit(h.job("u1", VIN, target(1))).await?;

    wait_for_event(&mut events, WAIT, |e| matches!(e.kind, EventKind::ReportRefunded))
        .await
        .ok_or_else(|| anyhow::anyhow!("no refund after delivery failure"))?;

    let user = h.user("u1").await?;
    assert_eq!(user.monthly_used, 0);
    assert_eq!(user.total_reports, 0);

    let frames = h.port.frames_for(target(1));
    let last = frames.last().map(String::as_str).unwrap_or("");
    assert!(last.contains(&vinhub::catalog::t("report.error.delivery", "en")));
    Ok(())
}

// -- Transient non-PDF body ---------------------------------------------------

#[tokio::test]
async fn non_pdf_body_retries_then_succeeds() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.activate("u1", 25, 500).await?;
    let mut events = h.engine.events();

    h.upstream.enqueue(Scripted::NonPdf);
    h.engine.submit(h.job("u1", VIN, target(1))).await?;

    wait_for_event(&mut events, WAIT, |e| {
        matches!(e.kind, EventKind::ReportSucceeded { .. })
    })
    .await
    .ok_or_else(|| anyhow::anyhow!("run never succeeded"))?;

    assert_eq!(h.upstream.hits(), 2);
    Ok(())
}
