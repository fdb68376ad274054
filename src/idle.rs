//! Ordered store of idle objects

use std::collections::VecDeque;

use crate::pooled::{ObjectId, PooledObject};

/// Idle objects in borrow order: the front is always borrowed next.
///
/// With LIFO ordering returns go to the front, with FIFO to the back.
pub(crate) struct IdleObjects<T> {
    deque: VecDeque<PooledObject<T>>,
}

impl<T> IdleObjects<T> {
    pub fn new() -> Self {
        Self {
            deque: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.deque.len()
    }

    pub fn pop_for_borrow(&mut self) -> Option<PooledObject<T>> {
        self.deque.pop_front()
    }

    pub fn push(&mut self, obj: PooledObject<T>, lifo: bool) {
        if lifo {
            self.deque.push_front(obj);
        } else {
            self.deque.push_back(obj);
        }
    }

    /// Put an object where the next borrow will find it.
    pub fn push_to_borrow_head(&mut self, obj: PooledObject<T>) {
        self.deque.push_front(obj);
    }

    /// Put an object back at the least-recently-returned end.
    pub fn push_oldest(&mut self, obj: PooledObject<T>, lifo: bool) {
        if lifo {
            self.deque.push_back(obj);
        } else {
            self.deque.push_front(obj);
        }
    }

    /// Remove a specific object, if it is still idle.
    pub fn take(&mut self, id: ObjectId) -> Option<PooledObject<T>> {
        let pos = self.deque.iter().position(|obj| obj.id() == id)?;
        self.deque.remove(pos)
    }

    /// Ids of the idle objects, longest idle first.
    pub fn eviction_order(&self) -> VecDeque<ObjectId> {
        let mut ids: Vec<_> = self
            .deque
            .iter()
            .map(|obj| (obj.tracker.last_return(), obj.id()))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub fn drain(&mut self) -> Vec<PooledObject<T>> {
        self.deque.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn obj(id: u64) -> PooledObject<u64> {
        PooledObject::new(id, ObjectId(id))
    }

    fn borrow_order(idle: &mut IdleObjects<u64>) -> Vec<u64> {
        std::iter::from_fn(|| idle.pop_for_borrow().map(|o| o.value)).collect()
    }

    #[test]
    fn test_lifo_borrows_last_returned_first() {
        let mut idle = IdleObjects::new();
        idle.push(obj(1), true);
        idle.push(obj(2), true);
        idle.push(obj(3), true);
        assert_eq!(borrow_order(&mut idle), vec![3, 2, 1]);
    }

    #[test]
    fn test_fifo_borrows_first_returned_first() {
        let mut idle = IdleObjects::new();
        idle.push(obj(1), false);
        idle.push(obj(2), false);
        idle.push(obj(3), false);
        assert_eq!(borrow_order(&mut idle), vec![1, 2, 3]);
    }

    #[test]
    fn test_take_removes_only_the_named_object() {
        let mut idle = IdleObjects::new();
        idle.push(obj(1), true);
        idle.push(obj(2), true);

        assert_eq!(idle.take(ObjectId(1)).map(|o| o.value), Some(1));
        assert!(idle.take(ObjectId(1)).is_none());
        assert_eq!(idle.len(), 1);
    }

    #[test]
    fn test_eviction_order_is_oldest_first_regardless_of_lifo() {
        let mut idle = IdleObjects::new();
        for id in 1..=3 {
            idle.push(obj(id), true);
            thread::sleep(Duration::from_millis(2));
        }
        let order: Vec<_> = idle.eviction_order().into_iter().collect();
        assert_eq!(order, vec![ObjectId(1), ObjectId(2), ObjectId(3)]);
    }

    #[test]
    fn test_push_oldest_and_borrow_head() {
        let mut idle = IdleObjects::new();
        idle.push(obj(1), true);
        idle.push_oldest(obj(2), true);
        idle.push_to_borrow_head(obj(3));
        assert_eq!(borrow_order(&mut idle), vec![3, 1, 2]);
    }
}
