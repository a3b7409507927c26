//! Progress reporting abstraction for extraction runs
//!
//! Defines the `ProgressReporter` trait for lifecycle event reporting
//! and provides a no-op implementation for simple use cases.

/// Trait for reporting run progress at key lifecycle events
///
/// Implementations can send updates to channels, log to console, update UI, etc.
/// Detail workers call it concurrently, so implementations must be `Sync`.
pub trait ProgressReporter: Send + Sync {
    /// Report that a run for `template_name` has started
    fn report_run_started(&self, template_name: &str);

    /// Report that navigation to a URL has started
    fn report_navigation_started(&self, url: &str);

    /// Report that the listing has produced `total` items so far
    fn report_items_discovered(&self, total: usize);

    /// Report that a load-more action was performed
    fn report_load_action(&self, action: &str, actions_performed: u32);

    /// Report that one detail page was handled
    fn report_detail_fetched(&self, sequence_index: usize, success: bool);

    /// Report that the run has completed
    fn report_completed(&self, total_items: usize, failed_items: usize);

    /// Report an error that occurred during the run
    fn report_error(&self, error: &str);
}

/// Progress reporter that does nothing
///
/// All methods are no-ops and will be inlined away by the compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl ProgressReporter for NoOpProgress {
    #[inline(always)]
    fn report_run_started(&self, _template_name: &str) {}

    #[inline(always)]
    fn report_navigation_started(&self, _url: &str) {}

    #[inline(always)]
    fn report_items_discovered(&self, _total: usize) {}

    #[inline(always)]
    fn report_load_action(&self, _action: &str, _actions_performed: u32) {}

    #[inline(always)]
    fn report_detail_fetched(&self, _sequence_index: usize, _success: bool) {}

    #[inline(always)]
    fn report_completed(&self, _total_items: usize, _failed_items: usize) {}

    #[inline(always)]
    fn report_error(&self, _error: &str) {}
}
