use super::*;

#[tokio::test(start_paused = true)]
async fn wait_deadline_adds_max_wait() {
    let now = tokio::time::Instant::now();
    assert_eq!(wait_deadline(now, 1_500), Some(now + Duration::from_millis(1_500)));
}

#[tokio::test(start_paused = true)]
async fn huge_max_wait_never_panics() {
    // Representable on some platforms, not on others; either way no panic.
    let now = tokio::time::Instant::now();
    assert!(wait_deadline(now, u64::MAX).is_none_or(|deadline| deadline > now));
}
