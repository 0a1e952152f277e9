mod common;

use std::{sync::Arc, time::Duration};

use common::{START_MS, ScriptedFetcher, config, eventually, image_ref, manager, png};
use futures::future::join_all;
use tootles_media::{
    Deferred, FetchError, ManualClock, MediaKind, MediaRef, Presentation,
    Priority, RenderError, RenderOutcome, Tier, ViewerCommand, ViewerMap,
    render::status,
};

const CAT: &str = "https://files.example.social/media_attachments/cat.png";

fn deferred(outcome: RenderOutcome) -> Deferred {
    match outcome {
        RenderOutcome::Deferred(deferred) => deferred,
        other => panic!("expected Deferred, got {}", other.summary()),
    }
}

#[tokio::test]
async fn second_request_is_served_from_memory_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let body = png(52, 52);
    assert!(body.len() > 8 * 1024);
    fetcher.serve(CAT, body);
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT).with_description("A cat asleep on a keyboard");

    match manager.get_preview(&media).await {
        RenderOutcome::Rendered(Presentation::Inline(img)) => {
            assert_eq!((img.width, img.height), (52, 52));
            assert_eq!(img.alt_text, "A cat asleep on a keyboard");
        }
        other => panic!("expected inline render, got {}", other.summary()),
    }
    assert!(manager.cache().contains(media.key(), Tier::Memory));
    assert!(manager.cache().contains(media.key(), Tier::Disk));
    assert_eq!(fetcher.calls(), 1);

    assert!(manager.get_preview(&media).await.is_rendered());
    assert_eq!(fetcher.calls(), 1);
    let stats = manager.stats();
    assert_eq!(stats.cache.memory.hits, 1);
    assert_eq!(stats.loader.fetches_started, 1);
}

#[tokio::test]
async fn concurrent_requests_share_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.set_delay(Duration::from_millis(50));
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT);

    let outcomes = join_all((0..8).map(|_| manager.get_preview(&media))).await;

    assert!(outcomes.iter().all(RenderOutcome::is_rendered));
    assert_eq!(fetcher.calls(), 1);
    let stats = manager.stats();
    assert_eq!(stats.loader.fetches_started, 1);
    assert_eq!(stats.loader.deduplicated_waiters, 7);
    assert_eq!(stats.loader.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_timeouts_defer_with_alt_text_and_cache_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.set_delay(Duration::from_secs(120));
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT).with_description("Sunset over the harbour");

    let deferred = deferred(manager.get_preview(&media).await);

    assert_eq!(deferred.placeholder.alt_text, "Sunset over the harbour");
    assert_eq!(deferred.placeholder.status, status::TIMED_OUT);
    assert!(deferred.retry_after.is_some());
    assert_eq!(fetcher.calls(), 3);
    assert!(!manager.cache().contains(media.key(), Tier::Memory));
    assert!(!manager.cache().contains(media.key(), Tier::Disk));
    let stats = manager.stats();
    assert_eq!(stats.loader.retries, 2);
    assert_eq!(stats.loader.failed, 1);
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.fail_next(FetchError::HttpServerError { status: 503 }, 2);
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;

    assert!(manager.get_preview(&image_ref(CAT)).await.is_rendered());
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(manager.stats().loader.retries, 2);
}

#[tokio::test]
async fn client_errors_fail_fast_without_retry_hint() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;

    let deferred = deferred(manager.get_preview(&image_ref(CAT)).await);

    assert_eq!(deferred.placeholder.status, status::FAILED_TO_LOAD);
    assert_eq!(deferred.retry_after, None);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn non_http_scheme_is_rejected_before_any_request() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = MediaRef::new("ftp://files.example.social/cat.png", MediaKind::Image).unwrap();

    let deferred = deferred(manager.get_preview(&media).await);

    assert_eq!(deferred.placeholder.status, status::UNSUPPORTED_LINK);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn cancelling_preload_leaves_foreground_request_running() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.hold();
    let clock = ManualClock::new(START_MS);
    let manager = Arc::new(manager(config(dir.path()), &fetcher, &clock).await);
    let media = image_ref(CAT);

    let batch = manager.preload([media.clone()]);
    assert_eq!(batch.len(), 1);

    let foreground = {
        let manager = Arc::clone(&manager);
        let media = media.clone();
        tokio::spawn(async move { manager.get_preview(&media).await })
    };
    assert!(eventually(|| manager.stats().loader.deduplicated_waiters == 1).await);

    batch.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(manager.loader().is_in_flight(media.key()));

    fetcher.release();
    assert!(foreground.await.unwrap().is_rendered());
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(manager.stats().loader.cancellations, 0);
}

#[tokio::test]
async fn cancelling_the_only_waiter_cancels_the_fetch_without_caching() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.hold();
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT);

    let batch = manager.preload([media.clone()]);
    assert!(eventually(|| fetcher.calls() == 1).await);
    batch.cancel();
    assert!(eventually(|| !manager.loader().is_in_flight(media.key())).await);

    fetcher.release();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager.cache().contains(media.key(), Tier::Memory));
    assert!(!manager.cache().contains(media.key(), Tier::Disk));
    assert_eq!(manager.stats().loader.cancellations, 1);
}

#[tokio::test]
async fn dropped_preload_batch_still_warms_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let urls: Vec<String> = (0..3)
        .map(|i| format!("https://files.example.social/media/{i}.png"))
        .collect();
    for url in &urls {
        fetcher.serve(url, png(8, 8));
    }
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;

    let refs: Vec<MediaRef> = urls.iter().map(|u| image_ref(u)).collect();
    drop(manager.preload(refs.clone()));

    assert!(
        eventually(|| refs
            .iter()
            .all(|m| manager.cache().contains(m.key(), Tier::Memory)))
        .await
    );
    assert_eq!(fetcher.calls(), 3);

    // Already cached: nothing is scheduled the second time.
    assert!(manager.preload(refs).is_empty());
}

#[tokio::test]
async fn preloads_never_take_the_reserved_foreground_slot() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let mut cfg = config(dir.path());
    cfg.loader.max_concurrent = 2;
    cfg.loader.foreground_reserved = 1;
    let refs: Vec<MediaRef> = (0..5)
        .map(|i| image_ref(&format!("https://files.example.social/pre/{i}.png")))
        .collect();
    for media in &refs {
        fetcher.serve(media.url().as_str(), png(8, 8));
    }
    fetcher.serve(CAT, png(8, 8));
    fetcher.hold();
    let clock = ManualClock::new(START_MS);
    let manager = Arc::new(manager(cfg, &fetcher, &clock).await);

    let _batch = manager.preload(refs.clone());
    assert!(eventually(|| fetcher.calls() == 1).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(manager.stats().loader.queued, 4);

    let foreground = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.get_preview(&image_ref(CAT)).await })
    };
    assert!(eventually(|| fetcher.calls() == 2).await);

    fetcher.release();
    assert!(foreground.await.unwrap().is_rendered());
    assert!(
        eventually(|| refs
            .iter()
            .all(|m| manager.cache().contains(m.key(), Tier::Disk)))
        .await
    );
}

#[tokio::test]
async fn invalidate_cancels_in_flight_fetch_and_drops_entries() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    let clock = ManualClock::new(START_MS);
    let manager = Arc::new(manager(config(dir.path()), &fetcher, &clock).await);
    let media = image_ref(CAT);

    assert!(manager.get_preview(&media).await.is_rendered());
    assert!(manager.invalidate(&media).await);
    assert!(!manager.cache().contains(media.key(), Tier::Memory));
    assert!(!manager.cache().contains(media.key(), Tier::Disk));
    let thumbnail = media.key().thumbnail();
    assert!(!manager.cache().contains(&thumbnail, Tier::Memory));

    fetcher.hold();
    let pending = {
        let manager = Arc::clone(&manager);
        let media = media.clone();
        tokio::spawn(async move { manager.get_preview(&media).await })
    };
    assert!(eventually(|| fetcher.calls() == 2).await);
    assert!(manager.invalidate(&media).await);

    assert!(pending.await.unwrap().is_deferred());
    fetcher.release();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager.cache().contains(media.key(), Tier::Memory));
    assert!(!manager.cache().contains(media.key(), Tier::Disk));
}

#[tokio::test]
async fn disabled_previews_never_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    let mut cfg = config(dir.path());
    cfg.previews_enabled = false;
    let clock = ManualClock::new(START_MS);
    let manager = manager(cfg, &fetcher, &clock).await;
    let media = image_ref(CAT).with_description("Screenshot of a toot");

    let deferred = deferred(manager.get_preview(&media).await);
    assert_eq!(deferred.placeholder.status, status::PREVIEWS_DISABLED);
    assert_eq!(deferred.placeholder.alt_text, "Screenshot of a toot");
    assert!(manager.preload([media]).is_empty());
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn unsupported_bytes_become_a_placeholder_or_viewer_hint() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, b"<svg xmlns='http://www.w3.org/2000/svg'/>".to_vec());
    let clock = ManualClock::new(START_MS);

    let plain = manager(config(dir.path()), &fetcher, &clock).await;
    let deferred = deferred(plain.get_preview(&image_ref(CAT)).await);
    assert_eq!(deferred.placeholder.status, status::UNSUPPORTED_FORMAT);
    assert_eq!(deferred.retry_after, None);
    drop(plain);

    let other = tempfile::tempdir().unwrap();
    let mut cfg = config(other.path());
    cfg.viewers = ViewerMap::new().with(MediaKind::Image, ViewerCommand::new("feh -F").unwrap());
    let with_viewer = manager(cfg, &fetcher, &clock).await;
    match with_viewer.get_preview(&image_ref(CAT)).await {
        RenderOutcome::Rendered(Presentation::External(view)) => {
            assert_eq!(view.argv(), vec!["feh", "-F", CAT]);
        }
        other => panic!("expected external viewer, got {}", other.summary()),
    }
}

#[tokio::test]
async fn video_is_handed_to_the_configured_player() {
    let dir = tempfile::tempdir().unwrap();
    let url = "https://files.example.social/media_attachments/clip.mp4";
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(url, vec![0u8; 2048]);
    let mut cfg = config(dir.path());
    cfg.viewers = ViewerMap::new().with(MediaKind::Video, ViewerCommand::new("mpv").unwrap());
    let clock = ManualClock::new(START_MS);
    let manager = manager(cfg, &fetcher, &clock).await;
    let media = MediaRef::detect(url, None).unwrap();
    assert_eq!(media.kind(), MediaKind::Video);

    match manager.get_preview(&media).await {
        RenderOutcome::Rendered(Presentation::External(view)) => {
            assert_eq!(view.kind, MediaKind::Video);
            assert_eq!(view.argv(), vec!["mpv", url]);
        }
        other => panic!("expected external player, got {}", other.summary()),
    }
}

#[tokio::test]
async fn empty_payload_fails_with_corrupt_payload() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, Vec::new());
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;

    match manager.get_preview(&image_ref(CAT)).await {
        RenderOutcome::Failed(failure) => {
            assert!(matches!(failure.error, RenderError::CorruptPayload(_)));
            assert!(failure.placeholder.is_some());
        }
        other => panic!("expected failure, got {}", other.summary()),
    }
}

#[tokio::test]
async fn clear_cache_wipes_tiers_and_next_request_refetches() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT);

    assert!(manager.get_preview(&media).await.is_rendered());
    // Raw bytes and thumbnail in memory, raw bytes on disk.
    assert_eq!(manager.clear_cache().await.unwrap(), 3);
    assert!(!manager.cache().contains(media.key(), Tier::Memory));

    assert!(manager.get_preview(&media).await.is_rendered());
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn background_sweep_reclaims_expired_entries() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    let mut cfg = config(dir.path());
    cfg.expiry = Duration::from_secs(60);
    cfg.sweep_interval = Duration::from_millis(20);
    let clock = ManualClock::new(START_MS);
    let manager = manager(cfg, &fetcher, &clock).await;
    let media = image_ref(CAT);

    assert!(manager.get_preview(&media).await.is_rendered());
    assert!(manager.start_sweep());
    assert!(!manager.start_sweep());

    clock.advance(Duration::from_secs(61));
    assert!(
        eventually(|| !manager.cache().contains(media.key(), Tier::Memory)
            && !manager.cache().contains(media.key(), Tier::Disk))
        .await
    );
    assert!(manager.stats().cache.sweeps >= 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn broken_image_without_viewer_defers_with_retry_hint() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    let mut truncated = png(64, 64);
    truncated.truncate(40);
    fetcher.serve(CAT, truncated);
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT).with_description("Harbour at dusk");

    let deferred = deferred(manager.get_preview(&media).await);

    assert_eq!(deferred.placeholder.status, status::UNDECODABLE);
    assert_eq!(deferred.placeholder.alt_text, "Harbour at dusk");
    assert!(deferred.retry_after.is_some());
    let thumbnail = media.key().thumbnail();
    assert!(!manager.cache().contains(&thumbnail, Tier::Memory));
}

#[tokio::test]
async fn repeat_inline_preview_is_served_from_the_cached_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(300, 200));
    let mut cfg = config(dir.path());
    cfg.render.decode_slice = Duration::ZERO;
    let clock = ManualClock::new(START_MS);
    let manager = manager(cfg, &fetcher, &clock).await;
    let media = image_ref(CAT).with_description("A cat on a windowsill");
    let thumbnail = media.key().thumbnail();

    let first = match manager.get_preview(&media).await {
        RenderOutcome::Deferred(Deferred {
            pending: Some(pending),
            ..
        }) => pending.wait().await,
        outcome => outcome,
    };
    let RenderOutcome::Rendered(Presentation::Inline(first)) = first else {
        panic!("expected inline render, got {}", first.summary());
    };
    assert_eq!(first.thumbnail.width, 150);
    assert!(manager.cache().contains(&thumbnail, Tier::Memory));

    // A zero decode slice defers every decode, so only the cached
    // thumbnail can render straight away.
    match manager.get_preview(&media).await {
        RenderOutcome::Rendered(Presentation::Inline(again)) => {
            assert_eq!(again, first);
        }
        other => panic!("expected cached thumbnail, got {}", other.summary()),
    }
    assert_eq!(manager.stats().cache.memory.hits, 1);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn bytes_fetched_before_an_invalidate_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.hold();
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT);

    let handle = manager.loader().fetch(&media, Priority::Foreground);
    assert!(eventually(|| fetcher.calls() == 1).await);
    manager.cache().invalidate(media.key()).await;
    fetcher.release();

    // The waiter still gets its bytes; the cache does not keep them.
    assert!(!handle.wait().await.unwrap().is_empty());
    assert!(!manager.cache().contains(media.key(), Tier::Memory));
    assert!(!manager.cache().contains(media.key(), Tier::Disk));

    assert!(manager.get_preview(&media).await.is_rendered());
    assert_eq!(fetcher.calls(), 2);
    assert!(manager.cache().contains(media.key(), Tier::Disk));
}

#[tokio::test]
async fn bytes_fetched_before_a_clear_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.hold();
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT);

    let handle = manager.loader().fetch(&media, Priority::Preload);
    assert!(eventually(|| fetcher.calls() == 1).await);
    manager.cache().clear().await.unwrap();
    fetcher.release();

    assert!(handle.wait().await.is_ok());
    assert!(!manager.cache().contains(media.key(), Tier::Memory));
    assert!(!manager.cache().contains(media.key(), Tier::Disk));
}

#[tokio::test]
async fn dropping_the_only_handle_after_the_body_arrives_still_caches_it() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(CAT, png(16, 16));
    fetcher.hold();
    let clock = ManualClock::new(START_MS);
    let manager = manager(config(dir.path()), &fetcher, &clock).await;
    let media = image_ref(CAT);

    let handle = manager.loader().fetch(&media, Priority::Foreground);
    assert!(eventually(|| fetcher.calls() == 1).await);
    fetcher.release();
    assert!(eventually(|| fetcher.served() == 1).await);
    drop(handle);

    assert!(
        eventually(|| manager.cache().contains(media.key(), Tier::Disk)
            && manager.cache().contains(media.key(), Tier::Memory))
        .await
    );
    assert!(!manager.loader().is_in_flight(media.key()));
}
