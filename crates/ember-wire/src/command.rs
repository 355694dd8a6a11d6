use std::fmt;

/// Canonical, interned command names. The first request argument resolves
/// against this fixed table case-insensitively; anything else stays raw and
/// is answered with an unknown-command error downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandName {
    Ping,
    Echo,
    Get,
    Set,
    Del,
    Exists,
    Keys,
    Expire,
    Ttl,
    Persist,
    Type,
    Dbsize,
    Incr,
    Decr,
    Zadd,
    Zscore,
    Zrem,
    Zcard,
    Zrange,
}

const TABLE: &[(&[u8], CommandName)] = &[
    (b"PING", CommandName::Ping),
    (b"ECHO", CommandName::Echo),
    (b"GET", CommandName::Get),
    (b"SET", CommandName::Set),
    (b"DEL", CommandName::Del),
    (b"EXISTS", CommandName::Exists),
    (b"KEYS", CommandName::Keys),
    (b"EXPIRE", CommandName::Expire),
    (b"TTL", CommandName::Ttl),
    (b"PERSIST", CommandName::Persist),
    (b"TYPE", CommandName::Type),
    (b"DBSIZE", CommandName::Dbsize),
    (b"INCR", CommandName::Incr),
    (b"DECR", CommandName::Decr),
    (b"ZADD", CommandName::Zadd),
    (b"ZSCORE", CommandName::Zscore),
    (b"ZREM", CommandName::Zrem),
    (b"ZCARD", CommandName::Zcard),
    (b"ZRANGE", CommandName::Zrange),
];

impl CommandName {
    /// Case-insensitive lookup in the fixed table.
    pub fn lookup(raw: &[u8]) -> Option<Self> {
        TABLE.iter().find(|(name, _)| raw.eq_ignore_ascii_case(name)).map(|&(_, cmd)| cmd)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::Ping => "PING",
            CommandName::Echo => "ECHO",
            CommandName::Get => "GET",
            CommandName::Set => "SET",
            CommandName::Del => "DEL",
            CommandName::Exists => "EXISTS",
            CommandName::Keys => "KEYS",
            CommandName::Expire => "EXPIRE",
            CommandName::Ttl => "TTL",
            CommandName::Persist => "PERSIST",
            CommandName::Type => "TYPE",
            CommandName::Dbsize => "DBSIZE",
            CommandName::Incr => "INCR",
            CommandName::Decr => "DECR",
            CommandName::Zadd => "ZADD",
            CommandName::Zscore => "ZSCORE",
            CommandName::Zrem => "ZREM",
            CommandName::Zcard => "ZCARD",
            CommandName::Zrange => "ZRANGE",
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(CommandName::lookup(b"get"), Some(CommandName::Get));
        assert_eq!(CommandName::lookup(b"GeT"), Some(CommandName::Get));
        assert_eq!(CommandName::lookup(b"ZRANGE"), Some(CommandName::Zrange));
        assert_eq!(CommandName::lookup(b"FLUSHALL"), None);
        assert_eq!(CommandName::lookup(b""), None);
    }

    #[test]
    fn table_matches_canonical_names() {
        for &(raw, cmd) in TABLE {
            assert_eq!(cmd.as_str().as_bytes(), raw);
            assert_eq!(CommandName::lookup(raw), Some(cmd));
        }
    }
}
