//! Generated HTML: the informational root page and the test board.

use chrono::{DateTime, Timelike, Utc};
use spring83_core::{BOARD_LIMIT, BOARD_TTL, timestamp};

/// The page served at `/`. Informational only, not part of the protocol.
pub fn index_page(now: DateTime<Utc>) -> String {
    let ttl_days = BOARD_TTL.as_secs() / 86_400;
    let now = timestamp::format(now);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Spring '83 Server</title>
  <meta charset="utf-8">
  <style>
    body {{ font-family: sans-serif; max-width: 800px; margin: 0 auto; padding: 2em; }}
    code {{ background: #f0f0f0; padding: 0.2em; }}
  </style>
</head>
<body>
  <h1>Spring '83 Server</h1>
  <p>This server stores and serves boards for the
     <a href="https://github.com/robinsloan/spring-83">Spring '83</a> protocol.</p>
  <p>Board TTL: {ttl_days} days</p>
  <p>Maximum board size: {BOARD_LIMIT} bytes</p>
  <p>Current time: {now}</p>
</body>
</html>
"#
    )
}

/// Content for the reserved test key. Changes every hour and is never stored.
pub fn test_board(now: DateTime<Utc>) -> String {
    let hour = now.hour();
    let time = timestamp::time_element(now);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>Spring '83 Test Board</title>
  <meta charset="utf-8">
</head>
<body>
  <h1>Test Board</h1>
  <p>This is a test board that rotates content by the hour.</p>
  <p>Current hour: {hour}</p>
  {time}
</body>
</html>
"#
    )
}
