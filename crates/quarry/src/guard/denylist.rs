// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Fixed denylists consulted by the code safety checks.

pub const DANGEROUS_CALLS: &[&str] = &[
    "eval",
    "exec",
    "__import__",
    "compile",
    "open",
    "input",
    "raw_input",
    "globals",
    "locals",
    "vars",
    "dir",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
];

/// Matched by attribute name, whatever the receiver is.
pub const DANGEROUS_METHODS: &[&str] = &["system", "popen", "spawn", "fork"];

pub const FORBIDDEN_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "urllib",
    "urllib2",
    "urllib3",
    "requests",
    "http",
    "ftplib",
    "smtplib",
    "telnetlib",
    "xmlrpc",
    "pickle",
    "cPickle",
    "marshal",
    "shelve",
    "dbm",
    "anydbm",
    "ctypes",
    "imp",
    "importlib",
    "__builtin__",
    "builtins",
];

pub const FILE_PRIMITIVES: &[&str] = &["open", "file"];

pub const FILE_METHODS: &[&str] = &["read", "write", "open", "close"];

pub const QUERY_START_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "DELETE", "UPDATE", "INSERT", "DROP", "CREATE", "ALTER", "TRUNCATE",
];

pub const DESTRUCTIVE_SQL_KEYWORDS: &[&str] = &[
    "DROP",
    "DELETE",
    "TRUNCATE",
    "INSERT",
    "UPDATE",
    "ALTER",
    "CREATE",
    "REPLACE",
    "GRANT",
    "REVOKE",
    "EXEC",
    "EXECUTE",
    "xp_cmdshell",
    "sp_executesql",
    "BACKUP",
    "RESTORE",
    "MERGE",
];

pub fn is_forbidden_module(dotted: &str) -> bool {
    let top = dotted.split('.').next().unwrap_or(dotted);
    FORBIDDEN_MODULES.contains(&top)
}
