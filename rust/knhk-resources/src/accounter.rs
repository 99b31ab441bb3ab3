//! Versioned ledger of resource totals, reservations and per-view usage.
//!
//! Modeled structurally on the async `Arc<RwLock<HashMap<...>>>` allocation
//! state used by the three-phase resource module this crate's sibling
//! synchronization manager is grounded on, generalized here to carry an
//! arbitrary number of concurrent views rather than just one.

use crate::assignment::{FillPolicy, ResourceAssignment};
use crate::error::{ResourceError, Result};
use crate::path::{Class, ResourcePath};
use crate::resource::Resource;
use crate::view::{ResourceView, ViewToken, SYSTEM_VIEW};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, instrument};

/// Lifecycle of the accounter itself, independent of any one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AccounterState {
    NotReady = 0,
    Ready = 1,
    Sync = 2,
}

impl From<u8> for AccounterState {
    fn from(v: u8) -> Self {
        match v {
            0 => AccounterState::NotReady,
            2 => AccounterState::Sync,
            _ => AccounterState::Ready,
        }
    }
}

pub struct ResourceAccounter {
    resources: DashMap<String, Resource>,
    views: RwLock<std::collections::HashMap<ViewToken, ResourceView>>,
    system_view: AtomicU64,
    next_token: AtomicU64,
    state: AtomicU8,
    ready_notify: Notify,
    sync_notify: Notify,
}

impl Default for ResourceAccounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceAccounter {
    pub fn new() -> Self {
        let mut views = std::collections::HashMap::new();
        views.insert(SYSTEM_VIEW, ResourceView::new(SYSTEM_VIEW, "system"));
        Self {
            resources: DashMap::new(),
            views: RwLock::new(views),
            system_view: AtomicU64::new(SYSTEM_VIEW),
            next_token: AtomicU64::new(SYSTEM_VIEW + 1),
            state: AtomicU8::new(AccounterState::NotReady as u8),
            ready_notify: Notify::new(),
            sync_notify: Notify::new(),
        }
    }

    // --- §4.A Resource Tree & Path -----------------------------------

    #[instrument(skip(self))]
    pub fn register(&self, path: ResourcePath, total: u64, model: &str) {
        let key = path.to_string();
        self.resources
            .entry(key)
            .and_modify(|r| {
                // Idempotent at the value level: repeated registration of
                // the same path just refreshes total/model.
                let _ = r.update_total(total, 0);
            })
            .or_insert_with(|| Resource::new(path, total, model));
    }

    pub fn find(&self, pattern: &ResourcePath, mode: Class) -> Option<ResourcePath> {
        self.resources
            .iter()
            .map(|e| e.value().path().clone())
            .find(|p| p.matches(pattern, mode))
    }

    pub fn find_list(&self, pattern: &ResourcePath, mode: Class) -> Vec<ResourcePath> {
        self.resources
            .iter()
            .map(|e| e.value().path().clone())
            .filter(|p| p.matches(pattern, mode))
            .collect()
    }

    pub fn set_online(&self, path: &ResourcePath, online: bool) -> Result<()> {
        let mut r = self
            .resources
            .get_mut(&path.to_string())
            .ok_or_else(|| ResourceError::NoSuchResource(path.to_string()))?;
        r.set_online(online);
        Ok(())
    }

    pub fn reserve(&self, path: &ResourcePath, amount: u64) -> Result<()> {
        let mut r = self
            .resources
            .get_mut(&path.to_string())
            .ok_or_else(|| ResourceError::NoSuchResource(path.to_string()))?;
        r.reserve(amount)
    }

    pub async fn update_total(&self, path: &ResourcePath, new_total: u64) -> Result<()> {
        let used = self.used(path, SYSTEM_VIEW).await?;
        let mut r = self
            .resources
            .get_mut(&path.to_string())
            .ok_or_else(|| ResourceError::NoSuchResource(path.to_string()))?;
        r.update_total(new_total, used)
    }

    // --- §4.G power/energy monitor sampling -----------------------------

    /// Folds a power-monitor sample into `path`'s EMA for `kind`, returning
    /// the updated average for trigger evaluation.
    pub fn sample_power(
        &self,
        path: &ResourcePath,
        kind: crate::resource::InfoKind,
        value: f64,
        window: u32,
    ) -> Result<f64> {
        let mut r = self
            .resources
            .get_mut(&path.to_string())
            .ok_or_else(|| ResourceError::NoSuchResource(path.to_string()))?;
        Ok(r.sample_power(kind, value, window))
    }

    pub fn power_profile(&self, path: &ResourcePath) -> Result<crate::resource::PowerProfile> {
        self.resources
            .get(&path.to_string())
            .map(|r| r.power_profile.clone())
            .ok_or_else(|| ResourceError::NoSuchResource(path.to_string()))
    }

    pub fn all_paths(&self) -> Vec<ResourcePath> {
        self.resources.iter().map(|e| e.value().path().clone()).collect()
    }

    // --- Queries -------------------------------------------------------

    /// Total capacity, honoring `unreserved = total - reserved`.
    pub fn total(&self, path: &ResourcePath) -> Result<u64> {
        self.resources
            .get(&path.to_string())
            .map(|r| r.total())
            .ok_or_else(|| ResourceError::NoSuchResource(path.to_string()))
    }

    pub async fn used(&self, path: &ResourcePath, view: ViewToken) -> Result<u64> {
        let views = self.views.read().await;
        let v = views
            .get(&view)
            .ok_or(ResourceError::UnknownView(view))?;
        Ok(v.ledger.used(&path.to_string()))
    }

    /// Available capacity as seen by `uid`: an applicant's own holdings in
    /// this view are added back, so it sees room to re-request what it
    /// already has.
    pub async fn available(&self, path: &ResourcePath, view: ViewToken, uid: u32) -> Result<u64> {
        let r = self
            .resources
            .get(&path.to_string())
            .ok_or_else(|| ResourceError::NoSuchResource(path.to_string()))?;
        if !r.is_online() {
            return Ok(0);
        }
        let unreserved = r.unreserved();
        let views = self.views.read().await;
        let v = views.get(&view).ok_or(ResourceError::UnknownView(view))?;
        let key = path.to_string();
        let used = v.ledger.used(&key);
        let own = v.ledger.used_by(&key, uid);
        Ok(unreserved.saturating_sub(used).saturating_add(own))
    }

    // --- §4.B booking ----------------------------------------------------

    /// Resolves how much of `assignment.amount` lands on each bound
    /// resource against *live* availability in `view`, mirroring
    /// `SchedResourceBooking`'s per-resource walk: `SEQUENTIAL` drains one
    /// resource before touching the next; `BALANCED` splits evenly up
    /// front but still caps each share at what that resource can actually
    /// offer. Errors with `UsageExceeded` if the bound set as a whole
    /// can't cover the requested amount.
    async fn resolve_assignment(
        &self,
        assignment: &ResourceAssignment,
        view: ViewToken,
        uid: u32,
    ) -> Result<Vec<(ResourcePath, u64)>> {
        let bound = assignment.bound_resources();
        if bound.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = Vec::with_capacity(bound.len());
        let mut remaining = assignment.amount;
        let even_share = assignment.amount / bound.len() as u64;

        for resource_path in bound {
            if remaining == 0 {
                break;
            }
            let avail = self.available(resource_path, view, uid).await?;
            let take = match assignment.fill_policy {
                FillPolicy::Sequential => remaining.min(avail),
                FillPolicy::Balanced => even_share.min(remaining).min(avail),
            };
            if take > 0 {
                resolved.push((resource_path.clone(), take));
                remaining -= take;
            }
        }

        if remaining > 0 {
            return Err(ResourceError::UsageExceeded {
                view,
                requested: assignment.amount,
                available: assignment.amount - remaining,
            });
        }
        Ok(resolved)
    }

    #[instrument(skip(self, assignments))]
    pub async fn check_availability(
        &self,
        assignments: &[ResourceAssignment],
        view: ViewToken,
        uid: u32,
    ) -> Result<()> {
        for assignment in assignments {
            self.resolve_assignment(assignment, view, uid).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, assignments))]
    pub async fn book_resources(
        &self,
        uid: u32,
        assignments: &[ResourceAssignment],
        view: ViewToken,
    ) -> Result<()> {
        {
            let views = self.views.read().await;
            let v = views.get(&view).ok_or(ResourceError::UnknownView(view))?;
            if v.ledger.holds_any(uid) {
                return Err(ResourceError::AppAlreadyHoldsResources { uid, view });
            }
        }

        let mut per_assignment = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            per_assignment.push(self.resolve_assignment(assignment, view, uid).await?);
        }

        let mut views = self.views.write().await;
        let v = views.get_mut(&view).ok_or(ResourceError::UnknownView(view))?;
        for resolved in per_assignment {
            for (resource_path, qty) in resolved {
                let key = resource_path.to_string();
                v.ledger
                    .bookings
                    .entry(key.clone())
                    .or_default()
                    .insert(uid, qty);
                v.ledger.touched.insert(key);
            }
        }
        debug!(uid, view, "booked resources");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn release_resources(&self, uid: u32, view: ViewToken) -> Result<()> {
        let mut views = self.views.write().await;
        let v = views.get_mut(&view).ok_or(ResourceError::UnknownView(view))?;
        for bookings in v.ledger.bookings.values_mut() {
            bookings.remove(&uid);
        }
        Ok(())
    }

    // --- Views -----------------------------------------------------------

    pub async fn get_view(&self, tag: &str) -> ViewToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let mut views = self.views.write().await;
        let source_token = self.system_view.load(Ordering::SeqCst);
        let forked = {
            let source = views.get(&source_token).expect("system view always exists");
            ResourceView::fork(token, tag, source)
        };
        views.insert(token, forked);
        token
    }

    pub async fn put_view(&self, token: ViewToken) -> Result<()> {
        if token == self.system_view.load(Ordering::SeqCst) {
            return Err(ResourceError::UnauthorizedViewOp(token));
        }
        let mut views = self.views.write().await;
        views
            .remove(&token)
            .ok_or(ResourceError::UnknownView(token))?;
        Ok(())
    }

    /// Promotes `token` to be the new system view, putting the previous
    /// one. Returns the previous system view's token.
    #[instrument(skip(self))]
    pub async fn set_view(&self, token: ViewToken) -> Result<ViewToken> {
        {
            let views = self.views.read().await;
            if !views.contains_key(&token) {
                return Err(ResourceError::UnknownView(token));
            }
        }
        let previous = self.system_view.swap(token, Ordering::SeqCst);
        if previous != token {
            let mut views = self.views.write().await;
            views.remove(&previous);
        }
        Ok(previous)
    }

    pub fn system_view(&self) -> ViewToken {
        self.system_view.load(Ordering::SeqCst)
    }

    // --- Accounter state machine -----------------------------------------

    pub fn state(&self) -> AccounterState {
        AccounterState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn set_platform_ready(&self) {
        self.state.store(AccounterState::Ready as u8, Ordering::SeqCst);
        self.ready_notify.notify_waiters();
    }

    pub fn set_platform_not_ready(&self) {
        self.state.store(AccounterState::NotReady as u8, Ordering::SeqCst);
    }

    pub async fn wait_for_platform_ready(&self) {
        while self.state() != AccounterState::Ready && self.state() != AccounterState::Sync {
            self.ready_notify.notified().await;
        }
    }

    #[instrument(skip(self))]
    pub fn sync_start(&self) -> Result<()> {
        let prev = self.state.swap(AccounterState::Sync as u8, Ordering::SeqCst);
        if AccounterState::from(prev) == AccounterState::Sync {
            self.state.store(prev, Ordering::SeqCst);
            return Err(ResourceError::SyncAlreadyInProgress);
        }
        Ok(())
    }

    /// Promotes `sync_view` to be the system view and returns to Ready.
    #[instrument(skip(self))]
    pub async fn sync_commit(&self, sync_view: ViewToken) -> Result<()> {
        if self.state() != AccounterState::Sync {
            return Err(ResourceError::SyncNotStarted);
        }
        self.set_view(sync_view).await?;
        self.state.store(AccounterState::Ready as u8, Ordering::SeqCst);
        self.sync_notify.notify_waiters();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn sync_abort(&self, sync_view: ViewToken) -> Result<()> {
        if self.state() != AccounterState::Sync {
            return Err(ResourceError::SyncNotStarted);
        }
        self.put_view(sync_view).await.ok();
        self.state.store(AccounterState::Ready as u8, Ordering::SeqCst);
        self.sync_notify.notify_waiters();
        Ok(())
    }

    pub async fn sync_wait(&self) {
        while self.state() == AccounterState::Sync {
            self.sync_notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::ResourceAssignment;

    fn path(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    async fn setup() -> ResourceAccounter {
        let acc = ResourceAccounter::new();
        acc.register(path("sys0.cpu0.pe0"), 100, "generic");
        acc.register(path("sys0.cpu0.pe1"), 100, "generic");
        acc.set_platform_ready();
        acc
    }

    #[tokio::test]
    async fn book_and_query_availability() {
        let acc = setup().await;
        let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), 40);
        a.bind(vec![path("sys0.cpu0.pe0")]);
        acc.book_resources(1, &[a], SYSTEM_VIEW).await.unwrap();

        let avail = acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 2).await.unwrap();
        assert_eq!(avail, 60);

        // the applicant itself sees its own holdings added back
        let own_avail = acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 1).await.unwrap();
        assert_eq!(own_avail, 100);
    }

    #[tokio::test]
    async fn booking_above_availability_is_rejected() {
        let acc = setup().await;
        let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), 150);
        a.bind(vec![path("sys0.cpu0.pe0")]);
        let err = acc.book_resources(1, &[a], SYSTEM_VIEW).await.unwrap_err();
        assert!(matches!(err, ResourceError::UsageExceeded { .. }));
    }

    #[tokio::test]
    async fn sequential_booking_spills_onto_next_resource() {
        let acc = setup().await;
        let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), 150);
        a.bind(vec![path("sys0.cpu0.pe0"), path("sys0.cpu0.pe1")]);
        acc.book_resources(1, &[a], SYSTEM_VIEW).await.unwrap();

        // pe0 (100 total) is drained first, the remaining 50 spills to pe1.
        assert_eq!(acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 2).await.unwrap(), 0);
        assert_eq!(acc.available(&path("sys0.cpu0.pe1"), SYSTEM_VIEW, 2).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn sequential_booking_fails_when_bound_set_cannot_cover_amount() {
        let acc = setup().await;
        let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), 250);
        a.bind(vec![path("sys0.cpu0.pe0"), path("sys0.cpu0.pe1")]);
        let err = acc.book_resources(1, &[a], SYSTEM_VIEW).await.unwrap_err();
        assert!(matches!(err, ResourceError::UsageExceeded { .. }));
        // nothing should have been committed from the failed attempt.
        assert_eq!(acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 2).await.unwrap(), 100);
        assert_eq!(acc.available(&path("sys0.cpu0.pe1"), SYSTEM_VIEW, 2).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn double_booking_same_uid_same_view_is_rejected() {
        let acc = setup().await;
        let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), 10);
        a.bind(vec![path("sys0.cpu0.pe0")]);
        acc.book_resources(1, &[a.clone()], SYSTEM_VIEW).await.unwrap();
        let err = acc.book_resources(1, &[a], SYSTEM_VIEW).await.unwrap_err();
        assert!(matches!(err, ResourceError::AppAlreadyHoldsResources { .. }));
    }

    #[tokio::test]
    async fn release_frees_capacity() {
        let acc = setup().await;
        let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), 40);
        a.bind(vec![path("sys0.cpu0.pe0")]);
        acc.book_resources(1, &[a], SYSTEM_VIEW).await.unwrap();
        acc.release_resources(1, SYSTEM_VIEW).await.unwrap();
        let avail = acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 2).await.unwrap();
        assert_eq!(avail, 100);
    }

    #[tokio::test]
    async fn view_fork_commit_promotes_bookings() {
        let acc = setup().await;
        let view = acc.get_view("scheduling").await;
        let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), 30);
        a.bind(vec![path("sys0.cpu0.pe0")]);
        acc.book_resources(5, &[a], view).await.unwrap();

        acc.sync_start().unwrap();
        acc.sync_commit(view).await.unwrap();

        assert_eq!(acc.system_view(), view);
        let avail = acc.available(&path("sys0.cpu0.pe0"), acc.system_view(), 6).await.unwrap();
        assert_eq!(avail, 70);
    }

    #[tokio::test]
    async fn sync_cannot_start_twice() {
        let acc = setup().await;
        acc.sync_start().unwrap();
        assert!(acc.sync_start().is_err());
    }

    #[tokio::test]
    async fn reserve_reduces_availability_for_new_applicants() {
        let acc = setup().await;
        acc.reserve(&path("sys0.cpu0.pe0"), 20).unwrap();
        let avail = acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 9).await.unwrap();
        assert_eq!(avail, 80);
    }

    #[test]
    fn unknown_resource_type_path_is_rejected() {
        assert!(ResourcePath::parse("zz0").is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::assignment::ResourceAssignment;
    use proptest::prelude::*;

    fn path(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    proptest! {
        /// A single booking never leaves availability negative, and the
        /// amount actually taken never exceeds what was requested nor the
        /// resource's total capacity.
        #[test]
        fn prop_booking_never_exceeds_total(total in 1u64..1000, requested in 0u64..2000) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let acc = ResourceAccounter::new();
                acc.register(path("sys0.cpu0.pe0"), total, "generic");
                acc.set_platform_ready();

                let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), requested);
                a.bind(vec![path("sys0.cpu0.pe0")]);
                let result = acc.book_resources(1, &[a], SYSTEM_VIEW).await;

                let used = acc.used(&path("sys0.cpu0.pe0"), SYSTEM_VIEW).await.unwrap();
                prop_assert!(used <= total);
                if requested > total {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(used, 0);
                } else {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(used, requested);
                }
                Ok(())
            })?;
        }

        /// Releasing a booking always restores availability to exactly what
        /// it was before the booking, regardless of the booked amount.
        #[test]
        fn prop_release_restores_prior_availability(total in 1u64..1000, requested in 0u64..1000) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let acc = ResourceAccounter::new();
                acc.register(path("sys0.cpu0.pe0"), total, "generic");
                acc.set_platform_ready();

                let before = acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 9).await.unwrap();

                let mut a = ResourceAssignment::new(path("sys0.cpu0.pe0"), requested.min(total));
                a.bind(vec![path("sys0.cpu0.pe0")]);
                acc.book_resources(1, &[a], SYSTEM_VIEW).await.unwrap();
                acc.release_resources(1, SYSTEM_VIEW).await.unwrap();

                let after = acc.available(&path("sys0.cpu0.pe0"), SYSTEM_VIEW, 9).await.unwrap();
                prop_assert_eq!(before, after);
                Ok(())
            })?;
        }
    }
}
