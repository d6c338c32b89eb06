//! Shared execution context slots.
//!
//! One context exists per interpreter (the VM is single-threaded and
//! synchronous): the `new.target` slot, module-scope state and the
//! cooperative VM-stop callback driven from backward branches.

use core::fmt;

use crate::consts::DEFAULT_STOP_FREQUENCY;
use crate::heap::ObjectId;
use crate::value::Value;

/// Result of one VM-stop callback invocation.
#[derive(Debug, Clone)]
pub enum StopSignal {
    /// Keep executing.
    Continue,
    /// Raise the value as a catchable exception.
    Throw(Value),
    /// Raise the value as an abort; catch handlers are bypassed and the
    /// outermost entry point unwinds.
    Abort(Value),
}

/// Cooperative interruption hook, polled every
/// [`Context::stop_frequency`] backward branches.
pub type StopCallback = Box<dyn FnMut() -> StopSignal>;

/// Per-interpreter shared slots.
pub struct Context {
    /// Active `new.target`, [`Value::Undefined`] outside construction.
    pub new_target: Value,
    /// Module scope installed by `run_module`.
    pub module_env: Option<ObjectId>,
    pub(crate) stop_callback: Option<StopCallback>,
    pub(crate) stop_frequency: u32,
    pub(crate) stop_counter: u32,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            new_target: Value::Undefined,
            module_env: None,
            stop_callback: None,
            stop_frequency: DEFAULT_STOP_FREQUENCY,
            stop_counter: DEFAULT_STOP_FREQUENCY,
        }
    }
}

impl Context {
    /// Register the stop callback, polled every `frequency` backward
    /// branches.
    pub fn set_stop_callback(&mut self, frequency: u32, callback: StopCallback) {
        let frequency = frequency.max(1);
        self.stop_callback = Some(callback);
        self.stop_frequency = frequency;
        self.stop_counter = frequency;
    }

    pub fn clear_stop_callback(&mut self) {
        self.stop_callback = None;
    }

    /// Decrement the backward-branch counter; on reaching zero, rearm it
    /// and poll the callback.
    pub(crate) fn poll_stop(&mut self) -> StopSignal {
        if self.stop_callback.is_none() {
            return StopSignal::Continue;
        }
        self.stop_counter -= 1;
        if self.stop_counter > 0 {
            return StopSignal::Continue;
        }
        self.stop_counter = self.stop_frequency;
        match &mut self.stop_callback {
            Some(callback) => callback(),
            None => StopSignal::Continue,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("new_target", &self.new_target)
            .field("module_env", &self.module_env)
            .field("stop_frequency", &self.stop_frequency)
            .field("stop_counter", &self.stop_counter)
            .field("has_stop_callback", &self.stop_callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_callback_fires_on_schedule() {
        let mut context = Context::default();
        context.set_stop_callback(3, Box::new(|| StopSignal::Throw(Value::Int(9))));

        assert!(matches!(context.poll_stop(), StopSignal::Continue));
        assert!(matches!(context.poll_stop(), StopSignal::Continue));
        assert!(matches!(context.poll_stop(), StopSignal::Throw(Value::Int(9))));
        // Counter rearms after firing.
        assert!(matches!(context.poll_stop(), StopSignal::Continue));
    }

    #[test]
    fn unregistered_callback_never_fires() {
        let mut context = Context::default();
        for _ in 0..10_000 {
            assert!(matches!(context.poll_stop(), StopSignal::Continue));
        }
    }
}
