//! Miscellaneous utility structs, functions and macros.

mod backoff_delayer;

use std::future::Future;

use futures::future::{self, AbortHandle};

use crate::platform;

#[doc(inline)]
pub use self::backoff_delayer::BackoffDelayer;

/// Creates new [`HashMap`] from a list of key-value pairs.
///
/// # Example
///
/// ```rust
/// # use medea_rtc_client::hashmap;
/// let map = hashmap! {
///     "a" => 1,
///     "b" => 2,
/// };
/// assert_eq!(map["a"], 1);
/// assert_eq!(map["b"], 2);
/// assert_eq!(map.get("c"), None);
/// ```
///
/// [`HashMap`]: std::collections::HashMap
#[macro_export]
macro_rules! hashmap {
    (@single $($x:tt)*) => (());
    (@count $($rest:expr),*) => (<[()]>::len(&[$(hashmap!(@single $rest)),*]));

    ($($key:expr => $value:expr,)+) => { hashmap!($($key => $value),+) };
    ($($key:expr => $value:expr),*) => {
        {
            let _cap = hashmap!(@count $($key),*);
            let mut _map = ::std::collections::HashMap::with_capacity(_cap);
            $(
                let _ = _map.insert($key, $value);
            )*
            _map
        }
    };
}

/// Generates [`Debug`] implementation for a provided structure with name of
/// this structure.
///
/// In debug print of this structure will be printed just a name of the
/// provided structure.
///
/// # Example
///
/// ```
/// # use medea_rtc_client::impl_debug_by_struct_name;
/// struct Foo;
///
/// impl_debug_by_struct_name!(Foo);
///
/// assert_eq!(format!("{:?}", Foo), "Foo")
/// ```
///
/// [`Debug`]: std::fmt::Debug
#[macro_export]
macro_rules! impl_debug_by_struct_name {
    ($mock:ty) => {
        impl ::std::fmt::Debug for $mock {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_struct(stringify!($mock)).finish()
            }
        }
    };
}

/// Abort handle of a spawned background task.
///
/// Task is aborted once its [`TaskHandle`] is dropped, so timers owned by a
/// component never fire against its torn down state.
#[derive(Debug)]
pub struct TaskHandle(AbortHandle);

impl TaskHandle {
    /// Aborts the task without waiting for [`Drop`].
    #[inline]
    pub fn abort(&self) {
        self.0.abort();
    }
}

impl From<AbortHandle> for TaskHandle {
    #[inline]
    fn from(handle: AbortHandle) -> Self {
        Self(handle)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawns the provided [`Future`] returning [`TaskHandle`] aborting it.
pub fn spawn_abortable<F>(fut: F) -> TaskHandle
where
    F: Future<Output = ()> + 'static,
{
    let (fut, handle) = future::abortable(fut);
    platform::spawn(async move {
        let _ = fut.await;
    });
    handle.into()
}
