/*
 * cancellable.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Schedario, a mail and contact backend library.
 *
 * Schedario is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Schedario is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Schedario.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Cancellation handle with the progress surface used by long operations
//! (schema migration, rebuilds). Listeners fire inline on the calling thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Result, StoreError};

type MessageListener = Box<dyn Fn(Option<&str>) + Send + Sync>;
type ProgressListener = Box<dyn Fn(i32) + Send + Sync>;

/// Cancellation flag plus a stack of progress messages and a percent value.
///
/// A popped message resets the reported percent to 0 so a follow-up phase
/// starts from a clean slate.
#[derive(Default)]
pub struct Cancellable {
    cancelled: AtomicBool,
    state: Mutex<ProgressState>,
}

#[derive(Default)]
struct ProgressState {
    messages: Vec<String>,
    percent: i32,
    message_listeners: Vec<MessageListener>,
    progress_listeners: Vec<ProgressListener>,
}

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` when the handle was cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StoreError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Register a listener for pushed (`Some(text)`) and popped (`None`) messages.
    pub fn on_message(&self, listener: MessageListener) {
        self.state.lock().unwrap().message_listeners.push(listener);
    }

    /// Register a listener for percent updates.
    pub fn on_progress(&self, listener: ProgressListener) {
        self.state.lock().unwrap().progress_listeners.push(listener);
    }

    pub fn push_message(&self, text: &str) {
        let mut state = self.state.lock().unwrap();
        state.messages.push(text.to_string());
        // listeners run without the lock so they may push/pop themselves
        let listeners = std::mem::take(&mut state.message_listeners);
        drop(state);
        for listener in &listeners {
            listener(Some(text));
        }
        self.state.lock().unwrap().message_listeners.splice(0..0, listeners);
    }

    pub fn pop_message(&self) {
        let mut state = self.state.lock().unwrap();
        state.messages.pop();
        state.percent = 0;
        let message_listeners = std::mem::take(&mut state.message_listeners);
        let progress_listeners = std::mem::take(&mut state.progress_listeners);
        drop(state);
        for listener in &message_listeners {
            listener(None);
        }
        for listener in &progress_listeners {
            listener(0);
        }
        let mut state = self.state.lock().unwrap();
        state.message_listeners.splice(0..0, message_listeners);
        state.progress_listeners.splice(0..0, progress_listeners);
    }

    pub fn progress(&self, percent: i32) {
        let mut state = self.state.lock().unwrap();
        state.percent = percent.clamp(0, 100);
        let percent = state.percent;
        let listeners = std::mem::take(&mut state.progress_listeners);
        drop(state);
        for listener in &listeners {
            listener(percent);
        }
        self.state.lock().unwrap().progress_listeners.splice(0..0, listeners);
    }

    /// Depth of the message stack; used by tests to verify push/pop pairing.
    pub fn message_depth(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }
}

/// `cancellable.check()` for an optional handle.
pub(crate) fn check(cancellable: Option<&Cancellable>) -> Result<()> {
    match cancellable {
        Some(c) => c.check(),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    #[test]
    fn cancel_flag() {
        let c = Cancellable::new();
        assert!(!c.is_cancelled());
        assert!(c.check().is_ok());
        c.cancel();
        assert!(c.is_cancelled());
        assert!(c.check().is_err());
    }

    #[test]
    fn messages_balance_and_progress_resets() {
        let c = Cancellable::new();
        let depth = Arc::new(AtomicI32::new(0));
        let last_percent = Arc::new(AtomicI32::new(-1));

        let depth2 = Arc::clone(&depth);
        c.on_message(Box::new(move |msg| {
            if msg.is_some() {
                depth2.fetch_add(1, Ordering::SeqCst);
            } else {
                depth2.fetch_sub(1, Ordering::SeqCst);
            }
        }));
        let last2 = Arc::clone(&last_percent);
        c.on_progress(Box::new(move |p| {
            last2.store(p, Ordering::SeqCst);
        }));

        c.push_message("migrating");
        c.progress(50);
        assert_eq!(last_percent.load(Ordering::SeqCst), 50);
        c.pop_message();
        assert_eq!(depth.load(Ordering::SeqCst), 0);
        assert_eq!(last_percent.load(Ordering::SeqCst), 0);
        assert_eq!(c.message_depth(), 0);
    }
}
