//! Concurrent registries mapping match rules/method triples to handlers.

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::match_rule::MatchRule;
use crate::message::MessageInfo;
use crate::signature::Signature;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type SignalHandler = Arc<dyn Fn(&MessageInfo) + Send + Sync>;
pub type MethodHandler = Arc<dyn Fn(&Bus, &MessageInfo) -> Result<Vec<Value>, Error> + Send + Sync>;

struct SignalEntry {
    rule: MatchRule,
    handler: SignalHandler,
}

#[derive(Default)]
pub struct Signals {
    next_id: Mutex<u64>,
    entries: Mutex<HashMap<u64, SignalEntry>>,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, rule: MatchRule, handler: SignalHandler) -> Result<u64> {
        let mut entries = self.entries.lock().expect("signals lock poisoned");
        if entries.values().any(|e| e.rule == rule) {
            return Err(Error::Register("identical match rule already registered".into()));
        }
        let mut next_id = self.next_id.lock().expect("signals id lock poisoned");
        let id = *next_id;
        *next_id += 1;
        entries.insert(id, SignalEntry { rule, handler });
        Ok(id)
    }

    pub fn remove(&self, id: u64) -> Option<MatchRule> {
        let mut entries = self.entries.lock().expect("signals lock poisoned");
        entries.remove(&id).map(|e| e.rule)
    }

    /// All handlers whose rule matches this signal, in registration order.
    pub fn matching(&self, info: &MessageInfo, own_unique_name: Option<&str>) -> Vec<SignalHandler> {
        let entries = self.entries.lock().expect("signals lock poisoned");
        let mut ids: Vec<_> = entries.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| entries.get(&id))
            .filter(|e| e.rule.matches(info, own_unique_name))
            .map(|e| e.handler.clone())
            .collect()
    }
}

struct MethodEntry {
    id: u64,
    handler: MethodHandler,
    signature: Option<Signature>,
}

#[derive(Default)]
pub struct Methods {
    next_id: Mutex<u64>,
    entries: Mutex<HashMap<(String, String, String), MethodEntry>>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        path: &str,
        interface: &str,
        member: &str,
        handler: MethodHandler,
        signature: Option<Signature>,
    ) -> Result<u64> {
        let key = (path.to_string(), interface.to_string(), member.to_string());
        let mut entries = self.entries.lock().expect("methods lock poisoned");
        if entries.contains_key(&key) {
            return Err(Error::Register(format!(
                "method already registered for {path} {interface} {member}"
            )));
        }
        let mut next_id = self.next_id.lock().expect("methods id lock poisoned");
        let id = *next_id;
        *next_id += 1;
        entries.insert(
            key,
            MethodEntry {
                id,
                handler,
                signature,
            },
        );
        Ok(id)
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock().expect("methods lock poisoned");
        let key = entries
            .iter()
            .find(|(_, e)| e.id == id)
            .map(|(k, _)| k.clone());
        if let Some(key) = key {
            entries.remove(&key);
            true
        } else {
            false
        }
    }

    /// Look up `(path, interface, member)`. If no interface was supplied in
    /// the incoming message, accept any interface registered for that
    /// `(path, member)`; if one was supplied and doesn't match, there is no
    /// fallback.
    pub fn find(&self, path: &str, interface: Option<&str>, member: &str) -> Option<(MethodHandler, Option<Signature>)> {
        let entries = self.entries.lock().expect("methods lock poisoned");
        match interface {
            Some(iface) => entries
                .get(&(path.to_string(), iface.to_string(), member.to_string()))
                .map(|e| (e.handler.clone(), e.signature.clone())),
            None => entries
                .iter()
                .find(|((p, _, m), _)| p == path && m == member)
                .map(|(_, e)| (e.handler.clone(), e.signature.clone())),
        }
    }
}
