//! Signal match rules: an immutable predicate plus its `AddMatch` string form.

use crate::error::{Error, Result};
use crate::names::{validate_bus_name, validate_interface_name, validate_member_name, validate_object_path};
use std::collections::BTreeMap;
use std::fmt::Write as _;

const MAX_RULE_LEN: usize = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchRule {
    object_path: Option<String>,
    interface: Option<String>,
    signal_name: Option<String>,
    sender: Option<String>,
    path_namespace: Option<String>,
    destination: Option<String>,
    arg0namespace: Option<String>,
    unicast: bool,
    args: BTreeMap<u8, String>,
    argpaths: BTreeMap<u8, String>,
}

impl MatchRule {
    pub fn builder() -> MatchRuleBuilder {
        MatchRuleBuilder::default()
    }

    pub fn object_path(&self) -> Option<&str> {
        self.object_path.as_deref()
    }
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }
    pub fn signal_name(&self) -> Option<&str> {
        self.signal_name.as_deref()
    }
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }
    pub fn path_namespace(&self) -> Option<&str> {
        self.path_namespace.as_deref()
    }
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }
    pub fn arg0namespace(&self) -> Option<&str> {
        self.arg0namespace.as_deref()
    }
    pub fn unicast(&self) -> bool {
        self.unicast
    }

    /// The `AddMatch`-ready string form, e.g.
    /// `type='signal',interface='a.b',member='X'`.
    pub fn to_match_string(&self) -> String {
        let mut out = String::from("type='signal'");
        let mut push = |key: &str, value: &str| {
            let _ = write!(out, ",{key}='{value}'");
        };
        if let Some(v) = &self.sender {
            push("sender", v);
        }
        if let Some(v) = &self.interface {
            push("interface", v);
        }
        if let Some(v) = &self.signal_name {
            push("member", v);
        }
        if let Some(v) = &self.object_path {
            push("path", v);
        }
        if let Some(v) = &self.path_namespace {
            push("path_namespace", v);
        }
        if let Some(v) = &self.destination {
            push("destination", v);
        }
        if let Some(v) = &self.arg0namespace {
            push("arg0namespace", v);
        }
        for (idx, v) in &self.args {
            push(&format!("arg{idx}"), v);
        }
        for (idx, v) in &self.argpaths {
            push(&format!("arg{idx}path"), v);
        }
        out
    }

    /// Whether this rule matches a decoded SIGNAL message.
    ///
    /// `own_unique_name` is this connection's unique bus name, used when the
    /// rule is `unicast` (i.e. scoped to signals destined for us).
    pub fn matches(&self, info: &crate::message::MessageInfo, own_unique_name: Option<&str>) -> bool {
        if let Some(expected) = &self.object_path {
            if info.path.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.interface {
            if info.interface.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.signal_name {
            if info.member.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(expected) = &self.sender {
            if info.sender.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if self.unicast {
            match (own_unique_name, info.destination.as_deref()) {
                (Some(own), Some(dest)) if dest == own => {}
                _ => return false,
            }
        } else if let Some(expected) = &self.destination {
            if info.destination.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_namespace {
            match &info.path {
                Some(p) if p == prefix => {}
                Some(p) if p.starts_with(prefix.as_str()) && p[prefix.len()..].starts_with('/') => {}
                _ => return false,
            }
        }
        if let Some(prefix) = &self.arg0namespace {
            let arg0 = info.args.first().and_then(|v| v.as_str());
            match arg0 {
                Some(a) if a == prefix => {}
                Some(a) if a.starts_with(prefix.as_str()) && a[prefix.len()..].starts_with('.') => {}
                _ => return false,
            }
        }
        for (idx, expected) in &self.args {
            let actual = info.args.get(*idx as usize).and_then(|v| v.as_str());
            if actual != Some(expected.as_str()) {
                return false;
            }
        }
        for (idx, expected) in &self.argpaths {
            let actual = info.args.get(*idx as usize).and_then(|v| v.as_str());
            let ok = match actual {
                Some(a) if a == expected => true,
                Some(a) if a.ends_with('/') && expected.starts_with(a) => true,
                Some(a) if expected.ends_with('/') && a.starts_with(expected.as_str()) => true,
                _ => false,
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct MatchRuleBuilder {
    rule: MatchRule,
}

impl MatchRuleBuilder {
    pub fn object_path(mut self, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_object_path(&path)?;
        self.rule.object_path = Some(path);
        Ok(self)
    }

    pub fn interface(mut self, interface: impl Into<String>) -> Result<Self> {
        let interface = interface.into();
        validate_interface_name(&interface)?;
        self.rule.interface = Some(interface);
        Ok(self)
    }

    pub fn signal_name(mut self, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_member_name(&name)?;
        self.rule.signal_name = Some(name);
        Ok(self)
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Result<Self> {
        let sender = sender.into();
        validate_bus_name(&sender, true)?;
        self.rule.sender = Some(sender);
        Ok(self)
    }

    pub fn path_namespace(mut self, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_object_path(&path)?;
        self.rule.path_namespace = Some(path);
        Ok(self)
    }

    pub fn destination(mut self, destination: impl Into<String>) -> Result<Self> {
        let destination = destination.into();
        validate_bus_name(&destination, true)?;
        self.rule.destination = Some(destination);
        Ok(self)
    }

    pub fn arg0namespace(mut self, namespace: impl Into<String>) -> Self {
        self.rule.arg0namespace = Some(namespace.into());
        self
    }

    pub fn unicast(mut self, unicast: bool) -> Self {
        self.rule.unicast = unicast;
        self
    }

    pub fn add_arg(mut self, index: u8, value: impl Into<String>) -> Result<Self> {
        if index > 63 {
            return Err(Error::Validation("arg index must be 0..=63".into()));
        }
        self.rule.args.insert(index, value.into());
        Ok(self)
    }

    pub fn add_argpath(mut self, index: u8, value: impl Into<String>) -> Result<Self> {
        if index > 63 {
            return Err(Error::Validation("arg index must be 0..=63".into()));
        }
        self.rule.argpaths.insert(index, value.into());
        Ok(self)
    }

    pub fn build(self) -> Result<MatchRule> {
        let rule = self.rule;
        if rule.to_match_string().len() > MAX_RULE_LEN {
            return Err(Error::TooLong("match rule".into()));
        }
        Ok(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageInfo;

    fn info(path: &str, args: Vec<crate::value::Value>) -> MessageInfo {
        MessageInfo {
            serial: 1,
            args,
            path: Some(path.to_string()),
            interface: Some("a.b".into()),
            member: Some("X".into()),
            sender: None,
            destination: None,
            no_reply_expected: false,
            allow_interactive_authorization: false,
            is_signal: true,
        }
    }

    #[test]
    fn path_namespace_matches_prefix_with_boundary() {
        let rule = MatchRule::builder().path_namespace("/a/b").unwrap().build().unwrap();
        assert!(rule.matches(&info("/a/b", vec![]), None));
        assert!(rule.matches(&info("/a/b/c", vec![]), None));
        assert!(!rule.matches(&info("/a/bc", vec![]), None));
    }

    #[test]
    fn arg0namespace_matches_prefix_with_dot_boundary() {
        let rule = MatchRule::builder().arg0namespace("com.ex").build().unwrap();
        let arg = crate::value::Value::Str("com.ex".into());
        assert!(rule.matches(&info("/a", vec![arg.clone()]), None));
        let arg2 = crate::value::Value::Str("com.ex.foo".into());
        assert!(rule.matches(&info("/a", vec![arg2]), None));
        let arg3 = crate::value::Value::Str("com.example".into());
        assert!(!rule.matches(&info("/a", vec![arg3]), None));
    }

    #[test]
    fn rejects_arg_index_out_of_range() {
        assert!(MatchRule::builder().add_arg(64, "x").is_err());
    }
}
