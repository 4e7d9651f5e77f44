//! Shell-script stand-ins for the external tools, shared by the
//! integration tests.
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use fuzzdeck_orchestration::{Coordinator, OrchestratorConfig, Tool, ToolBinaries};
use fuzzdeck_storage::{JobRecord, MemoryJobStore};

const AFL_CC: &str = r#"#!/bin/sh
src=""; out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    *.c) src="$1" ;;
  esac
  shift
done
if grep -q SLOW_BUILD "$src"; then
  sleep 0.5
fi
if grep -q SYNTAX_ERROR "$src"; then
  echo "$src:1:1: error: expected ';' before '}' token" >&2
  exit 1
fi
cp "$src" "$out"
"#;

const AFL_FUZZ: &str = r#"#!/bin/sh
out=""; bin=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    --) bin="$2"; shift ;;
  esac
  shift
done
mkdir -p "$out/main/crashes" "$out/main/hangs" "$out/main/queue"
printf 'execs_per_sec     : 1234\ncycles_done       : 7\n' > "$out/main/fuzzer_stats"
echo crash > "$out/main/crashes/id:000000,sig:11"
echo "Crashes found by the fuzzer" > "$out/main/crashes/README.txt"
echo seed > "$out/main/queue/id:000000"
status_block() {
  echo "______"
  echo " process timing"
  echo "   run time : 0 days, 0 hrs, 0 min, 1 sec"
  echo "______"
}
if grep -q RUN_FOREVER "$bin"; then
  trap 'echo "[-] interrupted" >&2; exit 2' INT TERM
  while true; do
    status_block
    sleep 0.05
  done
fi
status_block
echo '{"edges": 42}' > "$out/main/coverage"
exit 0
"#;

const FFUF: &str = r#"#!/bin/sh
out=""; url=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    -u) url="$2"; shift ;;
  esac
  shift
done
base=$(echo "$url" | sed 's/FUZZ//')
echo ":: Progress: [1/1]"
printf '{"results":[{"url":"%sadmin","status":200,"duration":1200}]}' "$base" > "$out"
"#;

const DALFOX: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
  esac
  shift
done
printf '{"type":"V","param":"q"}\n{}\n' > "$out"
"#;

const WFUZZ: &str = r#"#!/bin/sh
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -f) out="$2"; shift ;;
  esac
  shift
done
printf '000000001:   200        7 L      12 W       100 Ch      "admin"\n' > "$out"
printf '000000002:   404        1 L       2 W        10 Ch      "nope"\n' >> "$out"
"#;

const RADAMSA: &str = r#"#!/bin/sh
n=1; tpl=""; input=""
while [ $# -gt 0 ]; do
  case "$1" in
    -n) n="$2"; shift ;;
    -o) tpl="$2"; shift ;;
    -s) shift ;;
    *) input="$1" ;;
  esac
  shift
done
if grep -q CRASH_ME "$input"; then
  echo "radamsa: fatal: cannot parse sample" >&2
  exit 3
fi
i=1
while [ "$i" -le "$n" ]; do
  out=$(echo "$tpl" | sed "s/%n/$i/")
  cp "$input" "$out"
  i=$((i + 1))
done
"#;

const ZZUF: &str = "#!/bin/sh\ncat\n";

/// Directory holding the fake binaries and a `common.txt` wordlist.
///
/// Written once per test binary, before any test spawns a process, so no
/// script is still open for writing when another thread forks.
pub fn tool_dir() -> &'static Path {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap().into_path();
        for (name, body) in [
            ("afl-clang-fast", AFL_CC),
            ("afl-fuzz", AFL_FUZZ),
            ("ffuf", FFUF),
            ("dalfox", DALFOX),
            ("wfuzz", WFUZZ),
            ("radamsa", RADAMSA),
            ("zzuf", ZZUF),
        ] {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        std::fs::write(dir.join("common.txt"), "admin\nnope\n").unwrap();
        dir
    })
}

pub fn config(data_dir: &Path) -> OrchestratorConfig {
    let tools = tool_dir();
    let bin = |name: &str| tools.join(name).display().to_string();
    OrchestratorConfig {
        data_dir: data_dir.to_path_buf(),
        wordlist_dir: tools.to_path_buf(),
        sample_interval_ms: 20,
        block_throttle_ms: 10,
        stop_grace_ms: Some(5000),
        reader_drain_ms: 2000,
        binaries: ToolBinaries {
            afl_cc: bin("afl-clang-fast"),
            afl_fuzz: bin("afl-fuzz"),
            ffuf: bin("ffuf"),
            dalfox: bin("dalfox"),
            wfuzz: bin("wfuzz"),
            radamsa: bin("radamsa"),
            zzuf: bin("zzuf"),
            ..ToolBinaries::default()
        },
        ..OrchestratorConfig::default()
    }
}

pub fn coordinator(data_dir: &Path) -> Coordinator {
    coordinator_with(config(data_dir))
}

pub fn coordinator_with(config: OrchestratorConfig) -> Coordinator {
    Coordinator::new(config, Arc::new(MemoryJobStore::new()))
}

/// Poll the record until `pred` holds
pub async fn wait_for<F>(c: &Coordinator, tool: Tool, job_id: &str, pred: F) -> JobRecord
where
    F: Fn(&JobRecord) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let record = c.get(tool, job_id).await.unwrap();
        if pred(&record) {
            return record;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting on {}: {:?}", job_id, record);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_terminal(c: &Coordinator, tool: Tool, job_id: &str) -> JobRecord {
    wait_for(c, tool, job_id, |r| r.is_terminal()).await
}
