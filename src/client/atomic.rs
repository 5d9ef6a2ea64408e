//! Server-side find-and-remove routines.
//!
//! Both routines locate the one entry whose embedded `jid` equals the target
//! and remove it inside a single atomic script execution, so no concurrent
//! mutator can slip between the scan and the removal. Matching is always on
//! the decoded jid field, never on whole-string equality of the serialized
//! record: two distinct jobs that happen to serialize identically must not
//! collide.
//!
//! At most one entry is removed per invocation. A missing collection key is
//! found=false, not an error.

use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::Script;

/// Entries fetched per window when walking a list
pub const LIST_WINDOW: usize = 1000;

/// Cursor batch hint when scanning a sorted set
pub const ZSCAN_COUNT: usize = 100;

/// Walk a sorted set with ZSCAN, decode each member, remove the first whose
/// jid matches. Undecodable members are skipped.
const ZSET_SOURCE: &str = r#"
    local cursor = "0"
    repeat
        local page = redis.call('ZSCAN', KEYS[1], cursor, 'COUNT', ARGV[2])
        cursor = page[1]
        local members = page[2]
        for i = 1, #members, 2 do
            local member = members[i]
            local ok, record = pcall(cjson.decode, member)
            if ok and type(record) == 'table' and record['jid'] == ARGV[1] then
                redis.call('ZREM', KEYS[1], member)
                return 1
            end
        end
    until cursor == "0"
    return 0
"#;

/// Walk a list from the head in fixed-size windows, decode each entry,
/// remove the first whose jid matches. Windowing bounds the server-side
/// working memory to one window instead of the whole list.
const LIST_SOURCE: &str = r#"
    local size = redis.call('LLEN', KEYS[1])
    local window = tonumber(ARGV[2])
    local start = 0
    while start < size do
        local entries = redis.call('LRANGE', KEYS[1], start, start + window - 1)
        for i = 1, #entries do
            local ok, record = pcall(cjson.decode, entries[i])
            if ok and type(record) == 'table' and record['jid'] == ARGV[1] then
                redis.call('LREM', KEYS[1], 1, entries[i])
                return 1
            end
        end
        start = start + window
    end
    return 0
"#;

static ZSET_FIND_REMOVE: Lazy<Script> = Lazy::new(|| Script::new(ZSET_SOURCE));
static LIST_FIND_REMOVE: Lazy<Script> = Lazy::new(|| Script::new(LIST_SOURCE));

/// Atomically find and remove one job from a sorted set by jid
///
/// Returns whether a matching member was removed.
pub async fn remove_from_sorted_set(
    conn: &mut MultiplexedConnection,
    key: &str,
    jid: &str,
) -> redis::RedisResult<bool> {
    let removed: i64 = ZSET_FIND_REMOVE
        .key(key)
        .arg(jid)
        .arg(ZSCAN_COUNT)
        .invoke_async(conn)
        .await?;
    Ok(removed == 1)
}

/// Atomically find and remove one job from a list by jid
///
/// Returns whether a matching entry was removed.
pub async fn remove_from_list(
    conn: &mut MultiplexedConnection,
    key: &str,
    jid: &str,
) -> redis::RedisResult<bool> {
    let removed: i64 = LIST_FIND_REMOVE
        .key(key)
        .arg(jid)
        .arg(LIST_WINDOW)
        .invoke_async(conn)
        .await?;
    Ok(removed == 1)
}
