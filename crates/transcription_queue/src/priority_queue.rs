use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::error::QueueError;
use crate::task::{Priority, WorkItem};

/// Heap ordering: priority class, then submission time, then enqueue sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
	rank: u8,
	submitted_at: DateTime<Utc>,
	seq: u64,
}

impl QueueKey {
	fn of(item: &WorkItem) -> Self {
		Self {
			rank: item.priority.rank(),
			submitted_at: item.submitted_at,
			seq: item.seq,
		}
	}
}

#[derive(Debug)]
struct QueueNode<T> {
	key: QueueKey,
	item: T,
}

/// Array-backed binary min-heap keyed by [`QueueKey`].
#[derive(Debug)]
pub struct ImplicitHeap<T> {
	heap: Vec<QueueNode<T>>,
}

impl<T> Default for ImplicitHeap<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> ImplicitHeap<T> {
	#[must_use]
	pub const fn new() -> Self {
		Self { heap: Vec::new() }
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.heap.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}

	pub fn push(&mut self, key: QueueKey, item: T) {
		self.heap.push(QueueNode { key, item });
		self.sift_up(self.heap.len() - 1);
	}

	#[must_use]
	pub fn peek(&self) -> Option<&T> {
		self.heap.first().map(|node| &node.item)
	}

	pub fn pop(&mut self) -> Option<T> {
		if self.heap.is_empty() {
			return None;
		}
		let last = self.heap.len() - 1;
		self.heap.swap(0, last);
		let node = self.heap.pop()?;
		if !self.heap.is_empty() {
			self.sift_down(0);
		}
		Some(node.item)
	}

	/// Removes items matching `remove` and rebuilds the heap in place.
	pub fn extract_if(&mut self, mut remove: impl FnMut(&T) -> bool) -> Vec<T> {
		let (removed, kept): (Vec<_>, Vec<_>) = self.heap.drain(..).partition(|node| remove(&node.item));
		self.heap = kept;
		for index in (0..self.heap.len() / 2).rev() {
			self.sift_down(index);
		}
		removed.into_iter().map(|node| node.item).collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.heap.iter().map(|node| &node.item)
	}

	/// Items in dequeue order.
	#[must_use]
	pub fn sorted(&self) -> Vec<&T> {
		let mut nodes: Vec<&QueueNode<T>> = self.heap.iter().collect();
		nodes.sort_by_key(|node| node.key);
		nodes.into_iter().map(|node| &node.item).collect()
	}

	const fn parent(index: usize) -> usize {
		(index - 1) / 2
	}

	const fn left_child(index: usize) -> usize {
		2 * index + 1
	}

	const fn right_child(index: usize) -> usize {
		2 * index + 2
	}

	fn sift_up(&mut self, mut index: usize) {
		while index > 0 {
			let parent = Self::parent(index);
			if self.heap[parent].key <= self.heap[index].key {
				break;
			}
			self.heap.swap(parent, index);
			index = parent;
		}
	}

	fn sift_down(&mut self, mut index: usize) {
		loop {
			let left = Self::left_child(index);
			let right = Self::right_child(index);
			let mut smallest = index;

			if left < self.heap.len() && self.heap[left].key < self.heap[smallest].key {
				smallest = left;
			}
			if right < self.heap.len() && self.heap[right].key < self.heap[smallest].key {
				smallest = right;
			}

			if smallest == index {
				break;
			}

			self.heap.swap(index, smallest);
			index = smallest;
		}
	}
}

#[derive(Debug, Default)]
struct QueueState {
	heap: ImplicitHeap<WorkItem>,
	/// Dequeued by a worker that has not settled the item under its file lock yet.
	claimed: Vec<WorkItem>,
	next_seq: u64,
}

/// Shared work list. API and discovery push, workers pull.
#[derive(Debug, Default)]
pub struct WorkQueue {
	state: Mutex<QueueState>,
	available: Notify,
}

impl WorkQueue {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, QueueState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Adds an item and returns its 1-based position.
	pub fn enqueue(&self, mut item: WorkItem) -> Result<usize, QueueError> {
		if item.priority == Priority::Delete {
			return Err(QueueError::DeletionNotQueueable);
		}
		let position = {
			let mut state = self.lock();
			item.seq = state.next_seq;
			state.next_seq += 1;
			let key = QueueKey::of(&item);
			state.heap.push(key, item);
			state.heap.iter().filter(|queued| QueueKey::of(queued) <= key).count()
		};
		self.available.notify_one();
		Ok(position)
	}

	pub fn dequeue(&self) -> Option<WorkItem> {
		self.lock().heap.pop()
	}

	/// Waits until an item can be taken.
	pub async fn next(&self) -> WorkItem {
		loop {
			let notified = self.available.notified();
			if let Some(item) = self.dequeue() {
				return item;
			}
			notified.await;
		}
	}

	/// Takes the next item and keeps it visible as claimed until [`WorkQueue::settle`].
	pub(crate) fn claim(&self) -> Option<WorkItem> {
		let mut state = self.lock();
		let item = state.heap.pop()?;
		state.claimed.push(item.clone());
		Some(item)
	}

	/// Waits until an item can be claimed.
	pub(crate) async fn next_claimed(&self) -> WorkItem {
		loop {
			let notified = self.available.notified();
			if let Some(item) = self.claim() {
				return item;
			}
			notified.await;
		}
	}

	/// Ends a claim. `false` when the item was taken back or removed after it was claimed.
	pub(crate) fn settle(&self, item: &WorkItem) -> bool {
		let mut state = self.lock();
		let before = state.claimed.len();
		state.claimed.retain(|claimed| claimed.seq != item.seq);
		state.claimed.len() != before
	}

	/// Drops every queued or claimed item for `filename`. Nothing for it can be dequeued afterwards.
	pub fn remove_all_for_filename(&self, filename: &str) -> usize {
		let mut state = self.lock();
		let claimed = state.claimed.len();
		state.claimed.retain(|item| item.filename != filename);
		let claimed = claimed - state.claimed.len();
		state.heap.extract_if(|item| item.filename == filename).len() + claimed
	}

	pub(crate) fn take(&self, filename: &str) -> Option<WorkItem> {
		let mut state = self.lock();
		if let Some(item) = state.heap.extract_if(|item| item.filename == filename).into_iter().next() {
			return Some(item);
		}
		let index = state.claimed.iter().position(|item| item.filename == filename)?;
		Some(state.claimed.remove(index))
	}

	#[must_use]
	pub fn contains(&self, filename: &str) -> bool {
		let state = self.lock();
		state.heap.iter().any(|item| item.filename == filename) || state.claimed.iter().any(|item| item.filename == filename)
	}

	#[must_use]
	pub fn find(&self, filename: &str) -> Option<WorkItem> {
		let state = self.lock();
		let found = state.heap.iter().chain(state.claimed.iter()).find(|item| item.filename == filename).cloned();
		found
	}

	/// 1-based position of the first item for `filename`. A claimed item is next in line.
	#[must_use]
	pub fn position(&self, filename: &str) -> Option<usize> {
		let state = self.lock();
		if state.claimed.iter().any(|item| item.filename == filename) {
			return Some(1);
		}
		state.heap.sorted().iter().position(|item| item.filename == filename).map(|index| index + 1)
	}

	#[must_use]
	pub fn snapshot(&self) -> Vec<WorkItem> {
		self.lock().heap.sorted().into_iter().cloned().collect()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.lock().heap.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.lock().heap.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::task::TranscriptionSettings;
	use std::sync::Arc;
	use std::time::Duration;

	fn item(filename: &str, priority: Priority) -> WorkItem {
		WorkItem::new(filename, priority, TranscriptionSettings::default())
	}

	#[test]
	fn test_heap_ordering() {
		let mut heap = ImplicitHeap::new();
		let now = Utc::now();
		for (seq, rank) in [(0, 2), (1, 1), (2, 2), (3, 1), (4, 0)] {
			heap.push(QueueKey { rank, submitted_at: now, seq }, seq);
		}

		let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).collect();
		assert_eq!(order, vec![4, 1, 3, 0, 2]);
		assert!(heap.is_empty());
	}

	#[test]
	fn test_extract_if_rebuilds_heap() {
		let mut heap = ImplicitHeap::new();
		let now = Utc::now();
		for seq in 0..20 {
			heap.push(QueueKey { rank: 1, submitted_at: now, seq }, seq);
		}

		let removed = heap.extract_if(|value| value % 3 == 0);
		assert_eq!(removed.len(), 7);

		let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).collect();
		let expected: Vec<u64> = (0..20).filter(|v| v % 3 != 0).collect();
		assert_eq!(order, expected);
	}

	#[test]
	fn test_class_order_then_fifo() {
		let queue = WorkQueue::new();
		queue.enqueue(item("auto-1.wav", Priority::AutoScan)).unwrap();
		queue.enqueue(item("api-1.wav", Priority::Api)).unwrap();
		queue.enqueue(item("auto-2.wav", Priority::AutoScan)).unwrap();
		queue.enqueue(item("api-2.wav", Priority::Api)).unwrap();

		let order: Vec<String> = std::iter::from_fn(|| queue.dequeue()).map(|item| item.filename).collect();
		assert_eq!(order, vec!["api-1.wav", "api-2.wav", "auto-1.wav", "auto-2.wav"]);
	}

	#[test]
	fn test_same_timestamp_breaks_ties_by_sequence() {
		let queue = WorkQueue::new();
		let first = item("a.wav", Priority::Api);
		let mut second = item("b.wav", Priority::Api);
		second.submitted_at = first.submitted_at;

		queue.enqueue(first).unwrap();
		queue.enqueue(second).unwrap();
		assert_eq!(queue.dequeue().unwrap().filename, "a.wav");
	}

	#[test]
	fn test_deletion_items_are_rejected() {
		let queue = WorkQueue::new();
		assert!(matches!(queue.enqueue(item("a.wav", Priority::Delete)), Err(QueueError::DeletionNotQueueable)));
		assert!(queue.is_empty());
	}

	#[test]
	fn test_remove_all_for_filename() {
		let queue = WorkQueue::new();
		queue.enqueue(item("keep.wav", Priority::AutoScan)).unwrap();
		queue.enqueue(item("drop.wav", Priority::Api)).unwrap();
		queue.enqueue(item("drop.wav", Priority::AutoScan)).unwrap();

		assert_eq!(queue.remove_all_for_filename("drop.wav"), 2);
		assert!(!queue.contains("drop.wav"));
		assert_eq!(queue.len(), 1);
		assert_eq!(queue.dequeue().unwrap().filename, "keep.wav");
		assert_eq!(queue.remove_all_for_filename("drop.wav"), 0);
	}

	#[test]
	fn test_positions_and_snapshot() {
		let queue = WorkQueue::new();
		assert_eq!(queue.enqueue(item("auto.wav", Priority::AutoScan)).unwrap(), 1);
		assert_eq!(queue.enqueue(item("api.wav", Priority::Api)).unwrap(), 1);

		assert_eq!(queue.position("auto.wav"), Some(2));
		assert_eq!(queue.position("missing.wav"), None);
		let names: Vec<String> = queue.snapshot().into_iter().map(|item| item.filename).collect();
		assert_eq!(names, vec!["api.wav", "auto.wav"]);
	}

	#[test]
	fn test_claimed_item_stays_visible_until_settled() {
		let queue = WorkQueue::new();
		queue.enqueue(item("a.wav", Priority::Api)).unwrap();

		let claimed = queue.claim().unwrap();
		assert!(queue.is_empty());
		assert!(queue.contains("a.wav"));
		assert_eq!(queue.find("a.wav").unwrap().task_id, claimed.task_id);
		assert_eq!(queue.position("a.wav"), Some(1));

		assert!(queue.settle(&claimed));
		assert!(!queue.contains("a.wav"));
		assert!(!queue.settle(&claimed));
	}

	#[test]
	fn test_taken_back_claim_cannot_be_settled() {
		let queue = WorkQueue::new();
		queue.enqueue(item("a.wav", Priority::AutoScan)).unwrap();
		queue.enqueue(item("b.wav", Priority::AutoScan)).unwrap();

		let first = queue.claim().unwrap();
		let second = queue.claim().unwrap();
		assert_eq!(queue.take("a.wav").unwrap().task_id, first.task_id);
		assert_eq!(queue.remove_all_for_filename("b.wav"), 1);

		assert!(!queue.settle(&first));
		assert!(!queue.settle(&second));
		assert!(!queue.contains("a.wav"));
	}

	#[test]
	fn test_requeued_claim_is_a_new_claim() {
		let queue = WorkQueue::new();
		queue.enqueue(item("a.wav", Priority::AutoScan)).unwrap();

		let stale = queue.claim().unwrap();
		let mut promoted = queue.take("a.wav").unwrap();
		promoted.priority = Priority::Api;
		queue.enqueue(promoted).unwrap();
		let fresh = queue.claim().unwrap();

		assert_eq!(fresh.task_id, stale.task_id);
		assert!(!queue.settle(&stale));
		assert!(queue.settle(&fresh));
	}

	#[tokio::test]
	async fn test_next_waits_for_enqueue() {
		let queue = Arc::new(WorkQueue::new());
		let waiter = {
			let queue = Arc::clone(&queue);
			tokio::spawn(async move { queue.next().await })
		};

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!waiter.is_finished());

		queue.enqueue(item("late.wav", Priority::Api)).unwrap();
		let pulled = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
		assert_eq!(pulled.filename, "late.wav");
	}
}
