pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LIVEBOOK CONFIGURATION
# =============================================================================
# Livebook keeps a live, newest-first view of a logbook event stream. It
# backfills the requested window from history, then follows new events as
# they are appended.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/livebook/config.yml
#   3. /etc/livebook/config.yml
#
# Paths may use ~ and $env{VAR} expansion.

# =============================================================================
# TIME WINDOW
# =============================================================================
# Exactly one of:
#   recent: <seconds>      Sliding window; older entries expire as time passes
#   range: [start, end]    Fixed RFC 3339 bounds; nothing ever expires

time:
  recent: 86400
  # range: ["2026-01-01T00:00:00Z", "2026-01-02T00:00:00Z"]

# =============================================================================
# FILTER (optional)
# =============================================================================
# Omit a list to leave that axis unfiltered. An entry matches when its
# entity_id or device_id is listed. An empty list matches nothing.

filter:
  entity_ids: null
  device_ids: null

# =============================================================================
# THROTTLE (optional)
# =============================================================================
# Rate limits for non-forced reloads and lookup-table refreshes.
# Durations: ms, s, m, h

throttle:
  load: 1s
  auxiliary: 60s

# Load trace contexts and registered user names as well as persons.
admin: false

# =============================================================================
# SOURCE
# =============================================================================
# A JSON-lines file with one event per line. Each event needs a numeric
# "when" (seconds since the Unix epoch); every other field is passed through.

source:
  path: ~/.local/share/livebook/events.jsonl
  # How often to check the event file for new lines
  poll_interval: 250ms
  # Max batches queued between the file follower and the engine
  batch_buffer: 1000
  # Optional lookup files (JSON). Missing files are treated as empty.
  # persons: [{"user_id": "...", "name": "..."}]
  # users:   [{"id": "...", "name": "..."}]
  # traces:  {"<context id>": {"run_id": "...", "domain": "...", "item_id": "..."}}
  # persons: ~/.local/share/livebook/persons.json
  # users: ~/.local/share/livebook/users.json
  # traces: ~/.local/share/livebook/traces.json
"#
    .to_string()
}
