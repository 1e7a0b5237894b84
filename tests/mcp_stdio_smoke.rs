use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

/// Exercises the stdio JSON-RPC handshake (`initialize`/`tools/list`/`ping`)
/// without touching the network: these three methods never call the
/// embedding or vector-index capabilities, so the test needs only a dummy
/// `VOYAGE_API_KEY` to pass config validation at startup.
#[test]
fn mcp_stdio_handshake_smoke() {
    let bin = env!("CARGO_BIN_EXE_cortexsearch");
    let repo_root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    let mut child = Command::new(bin)
        .arg("mcp")
        .arg("--root")
        .arg(&repo_root)
        .env("VOYAGE_API_KEY", "test-key-not-used")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn cortexsearch mcp");

    {
        let stdin = child.stdin.as_mut().expect("child stdin");

        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "protocolVersion": "2024-11-05" }
            })
        )
        .unwrap();

        writeln!(stdin, "{}", serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" })).unwrap();

        writeln!(stdin, "{}", serde_json::json!({ "jsonrpc": "2.0", "id": 3, "method": "ping" })).unwrap();

        writeln!(stdin, "{}", serde_json::json!({ "jsonrpc": "2.0", "id": 4, "method": "not_a_real_method" })).unwrap();
    }

    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let reader = BufReader::new(stdout);

    let mut replies_by_id: HashMap<i64, serde_json::Value> = HashMap::new();
    for line in reader.lines() {
        let line = line.expect("read stdout line");
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line).expect("stdout is json");
        let id = v.get("id").and_then(|x| x.as_i64()).expect("json-rpc response id");
        replies_by_id.insert(id, v);
        if replies_by_id.len() >= 4 {
            break;
        }
    }

    let status = child.wait().expect("wait child");
    assert!(status.success(), "mcp process should exit cleanly");

    {
        let v = replies_by_id.get(&1).expect("initialize reply");
        assert_eq!(v.get("jsonrpc").and_then(|x| x.as_str()), Some("2.0"));
        let result = v.get("result").expect("initialize result");
        assert!(result.get("capabilities").is_some());
    }

    {
        let v = replies_by_id.get(&2).expect("tools/list reply");
        let tools = v.get("result").and_then(|r| r.get("tools")).and_then(|t| t.as_array()).expect("tools array");
        let names: std::collections::HashSet<&str> = tools.iter().filter_map(|t| t.get("name").and_then(|n| n.as_str())).collect();
        for required in ["index_directory", "search_code", "codebase_search", "get_health_status"] {
            assert!(names.contains(required), "missing tool: {required}");
        }
    }

    {
        let v = replies_by_id.get(&3).expect("ping reply");
        assert!(v.get("result").is_some());
    }

    {
        let v = replies_by_id.get(&4).expect("unknown method reply");
        let error = v.get("error").expect("error field for unknown method");
        assert_eq!(error.get("code").and_then(|c| c.as_i64()), Some(-32601));
    }
}
