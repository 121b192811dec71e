// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use crate::error::Result;

pub type Callback<T> = Box<dyn FnMut(&T) -> Result<()>>;

/// Ordered list of closures run when some resource is (re)built or torn down.
/// Closures own whatever state they need to rebuild themselves.
pub struct CallbackList<T: ?Sized> {
    callbacks: Vec<Callback<T>>,
}

impl<T: ?Sized> Default for CallbackList<T> {
    fn default() -> Self {
        Self {
            callbacks: Vec::new(),
        }
    }
}

impl<T: ?Sized> CallbackList<T> {
    pub fn push(&mut self, callback: impl FnMut(&T) -> Result<()> + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Runs in registration order and stops at the first failure.
    pub fn run(&mut self, arg: &T) -> Result<()> {
        for callback in &mut self.callbacks {
            callback(arg)?;
        }
        Ok(())
    }
}

impl<T: ?Sized> fmt::Debug for CallbackList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackList")
            .field("len", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn runs_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = CallbackList::<u32>::default();
        for tag in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            list.push(move |n: &u32| {
                log.borrow_mut().push(format!("{tag}{n}"));
                Ok(())
            });
        }
        assert_eq!(list.len(), 3);
        list.run(&7).unwrap();
        assert_eq!(*log.borrow(), ["a7", "b7", "c7"]);
    }

    #[test]
    fn stops_at_first_failure() {
        let hits = Rc::new(RefCell::new(0));
        let mut list = CallbackList::<()>::default();
        list.push(|_: &()| Err(Error::NotCreated("framebuffer")));
        let after = Rc::clone(&hits);
        list.push(move |_: &()| {
            *after.borrow_mut() += 1;
            Ok(())
        });
        assert!(list.run(&()).is_err());
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn closures_keep_their_own_state() {
        let mut list = CallbackList::<str>::default();
        let mut seen = 0;
        list.push(move |s: &str| {
            seen += s.len();
            assert!(seen <= 8);
            Ok(())
        });
        list.run("rpwf").unwrap();
        list.run("rpwf").unwrap();
        assert!(!list.is_empty());
    }
}
