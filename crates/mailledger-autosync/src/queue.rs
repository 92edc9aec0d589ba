//! Queue helpers shared by the manager.
//!
//! All queues hold [`SyncStateHandle`]s in priority order. Folder identity is
//! the folder id, and siblings are folders on the same account.

use crate::folder_state::{FolderSyncState, SyncState, SyncStateHandle, same_folder};

/// Index of `state` in `queue`.
#[must_use]
pub fn position_of(queue: &[SyncStateHandle], state: &dyn FolderSyncState) -> Option<usize> {
    queue.iter().position(|s| same_folder(s.as_ref(), state))
}

/// Whether `state` is in `queue`.
#[must_use]
pub fn contains(queue: &[SyncStateHandle], state: &dyn FolderSyncState) -> bool {
    position_of(queue, state).is_some()
}

/// Remove `state` from `queue`. Returns whether it was present.
pub fn remove(queue: &mut Vec<SyncStateHandle>, state: &dyn FolderSyncState) -> bool {
    position_of(queue, state).is_some_and(|idx| {
        queue.remove(idx);
        true
    })
}

/// Collapse a priority queue to one entry per server.
///
/// Relative order is preserved. The first (highest priority) folder of each
/// server holds its slot, unless a later sibling is already downloading, in
/// which case the downloading sibling takes the slot instead.
#[must_use]
pub fn chain_folders_in_q(queue: &[SyncStateHandle]) -> Vec<SyncStateHandle> {
    let mut chained: Vec<SyncStateHandle> = Vec::with_capacity(queue.len());

    for folder in queue {
        let in_progress = folder.state() == SyncState::DownloadInProgress;
        match chained.iter().position(|c| folder.is_sibling(c.as_ref())) {
            Some(idx) => {
                if in_progress {
                    chained[idx] = folder.clone();
                }
            }
            None => chained.push(folder.clone()),
        }
    }

    chained
}

/// Index of the first sibling of `state` at or after `start`, skipping
/// `state` itself.
#[must_use]
pub fn search_q_for_sibling(
    queue: &[SyncStateHandle],
    state: &dyn FolderSyncState,
    start: usize,
) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, s)| !same_folder(s.as_ref(), state) && state.is_sibling(s.as_ref()))
        .map(|(idx, _)| idx)
}

/// Whether `queue` holds a sibling of `state`, optionally only siblings in
/// the given state.
#[must_use]
pub fn does_q_contain_any_sibling_of(
    queue: &[SyncStateHandle],
    state: &dyn FolderSyncState,
    filter: Option<SyncState>,
) -> bool {
    let mut start = 0;
    while let Some(idx) = search_q_for_sibling(queue, state, start) {
        if filter.is_none_or(|wanted| queue[idx].state() == wanted) {
            return true;
        }
        start = idx + 1;
    }
    false
}

/// Index of the next sibling after `state` that is ready to download.
///
/// Returns `None` if `state` is not in the queue.
#[must_use]
pub fn get_next_sibling(queue: &[SyncStateHandle], state: &dyn FolderSyncState) -> Option<usize> {
    let pos = position_of(queue, state)?;
    let mut start = pos + 1;
    while let Some(idx) = search_q_for_sibling(queue, state, start) {
        if queue[idx].state() == SyncState::ReadyToDownload {
            return Some(idx);
        }
        start = idx + 1;
    }
    None
}

/// Index of the highest-priority sibling of `state` that is ready to download
/// and accepted by `eligible`.
#[must_use]
pub fn get_highest_prio_sibling(
    queue: &[SyncStateHandle],
    state: &dyn FolderSyncState,
    eligible: impl Fn(&dyn FolderSyncState) -> bool,
) -> Option<usize> {
    let mut start = 0;
    while let Some(idx) = search_q_for_sibling(queue, state, start) {
        let candidate = queue[idx].as_ref();
        if candidate.state() == SyncState::ReadyToDownload && eligible(candidate) {
            return Some(idx);
        }
        start = idx + 1;
    }
    None
}
