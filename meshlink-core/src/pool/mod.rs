//! Bounded free list of [`DrpMessage`] values.
//!
//! A [`Block`] hands its message back to the pool on drop. Messages that find
//! the pool full are dropped, so at most `capacity` idle messages are kept.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::protocol::DrpMessage;

#[derive(Clone)]
pub struct MessagePool {
    idle: Arc<ArrayQueue<DrpMessage>>,
    body_capacity: usize,
}

impl MessagePool {
    /// `body_capacity` is reserved for the body of freshly allocated messages.
    pub fn new(capacity: usize, body_capacity: usize) -> Self {
        Self {
            idle: Arc::new(ArrayQueue::new(capacity.max(1))),
            body_capacity,
        }
    }
    pub fn idle(&self) -> usize {
        self.idle.len()
    }
    pub fn alloc(&self) -> Block<DrpMessage> {
        let msg = match self.idle.pop() {
            Some(mut msg) => {
                msg.reset();
                msg
            }
            None => DrpMessage::with_capacity(self.body_capacity),
        };
        Block {
            idle: self.idle.clone(),
            data: std::mem::ManuallyDrop::new(msg),
        }
    }
}

/// A pooled value, returned to its pool on drop.
pub struct Block<T> {
    idle: Arc<ArrayQueue<T>>,
    data: std::mem::ManuallyDrop<T>,
}

impl<T> Drop for Block<T> {
    fn drop(&mut self) {
        // Safety: `data` is not touched after this
        let data = unsafe { std::mem::ManuallyDrop::take(&mut self.data) };
        _ = self.idle.push(data);
    }
}

impl<T> Deref for Block<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for Block<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Block<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (*self.data).fmt(f)
    }
}
