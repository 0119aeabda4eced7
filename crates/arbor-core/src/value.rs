//! Textual node values and read-modify-write transitions
//!
//! A [`ValueCell`] never runs hooks itself: every mutation returns a
//! [`Transition`] that the tree hands to the owning node's change hook while
//! still holding the hierarchy lock, so a read-modify-write and its
//! notification are observed as one step.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::ValueError;

/// Old and new value of a single write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub old: String,
    pub new: String,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

/// Current textual value of a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueCell {
    value: String,
}

impl ValueCell {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            value: initial.into(),
        }
    }

    pub fn get(&self) -> &str {
        &self.value
    }

    /// Parse the current value
    pub fn get_as<T: FromStr>(&self) -> Result<T, ValueError> {
        parse_value(&self.value)
    }

    /// Store `new_value`
    pub fn set(&mut self, new_value: impl Into<String>) -> Transition {
        let new = new_value.into();
        let old = std::mem::replace(&mut self.value, new.clone());
        Transition { old, new }
    }

    /// Read, transform and write back in one exclusive step
    pub fn modify<F>(&mut self, f: F) -> Transition
    where
        F: FnOnce(&str) -> String,
    {
        let new = f(&self.value);
        self.set(new)
    }

    /// Typed read-modify-write. On a parse failure nothing is written.
    pub fn modify_as<T, F>(&mut self, f: F) -> Result<Transition, ValueError>
    where
        T: FromStr + Display,
        F: FnOnce(T) -> T,
    {
        let current: T = parse_value(&self.value)?;
        Ok(self.set(f(current).to_string()))
    }
}

fn parse_value<T: FromStr>(value: &str) -> Result<T, ValueError> {
    value.trim().parse::<T>().map_err(|_| ValueError::Parse {
        value: value.to_string(),
        type_name: std::any::type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_transition() {
        let mut cell = ValueCell::new("0");
        let t = cell.set("1");
        assert_eq!(t.old, "0");
        assert_eq!(t.new, "1");
        assert!(t.changed());
        assert!(!cell.set("1").changed());
        assert_eq!(cell.get(), "1");
    }

    #[test]
    fn test_modify_as_numeric() {
        let mut cell = ValueCell::new("17.5");
        let t = cell.modify_as::<f64, _>(|v| v + 0.5).unwrap();
        assert_eq!(t.new, "18");
        assert_eq!(cell.get_as::<f64>().unwrap(), 18.0);

        let mut flag = ValueCell::new("1");
        flag.modify_as::<u8, _>(|v| v ^ 1).unwrap();
        assert_eq!(flag.get(), "0");
    }

    #[test]
    fn test_modify_as_parse_failure_leaves_value() {
        let mut cell = ValueCell::new("warm");
        let err = cell.modify_as::<i64, _>(|v| v + 1).unwrap_err();
        assert!(matches!(err, ValueError::Parse { .. }));
        assert_eq!(cell.get(), "warm");
    }

    #[test]
    fn test_modify_with_closure() {
        let mut cell = ValueCell::new("abc");
        cell.modify(|v| v.to_uppercase());
        assert_eq!(cell.get(), "ABC");
    }
}
