//! Lua scripts for the lock protocol
//!
//! Every script takes `KEYS[1]` = lock key and `KEYS[2]` = queue key. `ARGV[1]` is always the
//! caller's token; the remaining arguments are listed per script below. Durations are milliseconds.
//!
//! The set of scripts is fixed. [`ScriptTable::standard`] builds it once per process and hands
//! out a shared reference, so backends can precompute digests when they are constructed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Names of the atomic operations the lock protocol relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptName {
    /// `ARGV[2]` = lease. Returns 1 if the lock key was set, 0 if it is held.
    Acquire,
    /// `ARGV[2]` = lease. Like `Acquire`, and also drops the caller's reservation on success.
    PollAcquire,
    /// `ARGV[2]` = lease. Returns 1 on success, -1 on token mismatch.
    Refresh,
    /// `ARGV[2]` = wake fan-out cap. Returns 1 on success, -1 on token mismatch, -2 if the delete failed.
    Release,
    /// `ARGV[2]` = remaining wait. Returns 1 on success, -1 if the reservation exists, -2 if the push failed.
    Reserve,
    /// `ARGV[2]` = lease, `ARGV[3]` = remaining wait.
    /// Returns 1 if acquired, 0 if re-queued, -1 if the reservation reset failed, -2 if the requeue failed.
    Reacquire,
    /// Removes the caller from the queue and drops its reservation. Returns 1.
    Abandon,
}

impl ScriptName {
    pub const ALL: [ScriptName; 7] = [
        ScriptName::Acquire,
        ScriptName::PollAcquire,
        ScriptName::Refresh,
        ScriptName::Release,
        ScriptName::Reserve,
        ScriptName::Reacquire,
        ScriptName::Abandon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptName::Acquire => "acquire",
            ScriptName::PollAcquire => "poll_acquire",
            ScriptName::Refresh => "refresh",
            ScriptName::Release => "release",
            ScriptName::Reserve => "reserve",
            ScriptName::Reacquire => "reacquire",
            ScriptName::Abandon => "abandon",
        }
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ACQUIRE: &str = r#"
    if redis.call('set', KEYS[1], ARGV[1], 'nx', 'px', ARGV[2]) then
        return 1
    end
    return 0
"#;

pub const POLL_ACQUIRE: &str = r#"
    if redis.call('set', KEYS[1], ARGV[1], 'nx', 'px', ARGV[2]) then
        redis.call('del', ARGV[1])
        return 1
    end
    return 0
"#;

pub const REFRESH: &str = r#"
    if redis.call('get', KEYS[1]) ~= ARGV[1] then
        return -1
    end
    return redis.call('pexpire', KEYS[1], ARGV[2])
"#;

pub const RELEASE: &str = r#"
    if redis.call('get', KEYS[1]) ~= ARGV[1] then
        return -1
    end

    if redis.call('del', KEYS[1]) ~= 1 then
        return -2
    end

    local limit = tonumber(ARGV[2])
    local woken = 0
    while woken < limit do
        local waiter = redis.call('lpop', KEYS[2])
        if not waiter then
            break
        end
        redis.call('lrem', KEYS[2], 0, waiter)

        if redis.call('get', waiter) == waiter and redis.call('del', waiter) == 1 then
            if waiter ~= ARGV[1] and redis.call('publish', waiter, waiter) == 1 then
                woken = woken + 1
            end
        end
    end
    return 1
"#;

pub const RESERVE: &str = r#"
    if not redis.call('set', ARGV[1], ARGV[1], 'nx', 'px', ARGV[2]) then
        return -1
    end
    if redis.call('rpush', KEYS[2], ARGV[1]) == 0 then
        return -2
    end
    return 1
"#;

pub const REACQUIRE: &str = r#"
    if redis.call('set', KEYS[1], ARGV[1], 'nx', 'px', ARGV[2]) then
        return 1
    end

    if not redis.call('set', ARGV[1], ARGV[1], 'nx', 'px', ARGV[3]) then
        return -1
    end

    if redis.call('lpush', KEYS[2], ARGV[1]) == 0 then
        return -2
    end
    return 0
"#;

pub const ABANDON: &str = r#"
    redis.call('lrem', KEYS[2], 0, ARGV[1])
    if redis.call('get', ARGV[1]) == ARGV[1] then
        redis.call('del', ARGV[1])
    end
    return 1
"#;

/// A named script and its Lua source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: ScriptName,
    source: &'static str,
}

impl Script {
    pub fn name(&self) -> ScriptName {
        self.name
    }

    pub fn source(&self) -> &'static str {
        self.source
    }
}

/// Immutable table of all protocol scripts
#[derive(Debug)]
pub struct ScriptTable {
    scripts: HashMap<ScriptName, Script>,
}

static STANDARD: LazyLock<Arc<ScriptTable>> = LazyLock::new(|| {
    let scripts = ScriptName::ALL
        .into_iter()
        .map(|name| {
            let source = match name {
                ScriptName::Acquire => ACQUIRE,
                ScriptName::PollAcquire => POLL_ACQUIRE,
                ScriptName::Refresh => REFRESH,
                ScriptName::Release => RELEASE,
                ScriptName::Reserve => RESERVE,
                ScriptName::Reacquire => REACQUIRE,
                ScriptName::Abandon => ABANDON,
            };
            (name, Script { name, source })
        })
        .collect();
    Arc::new(ScriptTable { scripts })
});

impl ScriptTable {
    /// The process-wide table
    pub fn standard() -> Arc<ScriptTable> {
        STANDARD.clone()
    }

    pub fn get(&self, name: ScriptName) -> &Script {
        // Built from ScriptName::ALL, every variant is present
        &self.scripts[&name]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Script> {
        ScriptName::ALL.iter().map(|name| self.get(*name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_is_complete() {
        let table = ScriptTable::standard();
        assert_eq!(table.iter().count(), ScriptName::ALL.len());
        for name in ScriptName::ALL {
            assert_eq!(table.get(name).name(), name);
            assert!(table.get(name).source().contains("redis.call"));
        }
    }

    #[test]
    fn test_standard_table_is_shared() {
        assert!(Arc::ptr_eq(&ScriptTable::standard(), &ScriptTable::standard()));
    }

    #[test]
    fn test_release_script_caps_fanout_by_argument() {
        let release = ScriptTable::standard().get(ScriptName::Release).source();
        assert!(release.contains("tonumber(ARGV[2])"));
        assert!(release.contains("waiter ~= ARGV[1]"));
    }
}
