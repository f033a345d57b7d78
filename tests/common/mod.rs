//! Shell-script stand-ins for Xvfb, xset, scrot, xdotool and the desktop apps.
//!
//! The fake xdotool appends every successful command to a `screen` file and
//! the fake scrot copies that file out, so a screenshot changes exactly when
//! an input command succeeds.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use glass_desktop::DisplayConfig;
use tempfile::TempDir;

pub const BAD_KEY: &str = "Bogus_Key";

pub struct FakeDesktop {
    dir: TempDir,
}

impl FakeDesktop {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let d = dir.path().display().to_string();

        write(dir.path(), "xvfb.sh", &format!(
            "DIR='{d}'\necho \"$*\" > \"$DIR/xvfb.args\"\necho $$ > \"$DIR/xvfb.pid\"\nexec sleep 30\n"
        ));
        write(dir.path(), "probe_ok.sh", "exit 0\n");
        write(dir.path(), "probe_fail.sh", "exit 1\n");
        write(dir.path(), "exit_now.sh", "exit 1\n");
        write(dir.path(), "wm.sh", &format!(
            "DIR='{d}'\necho $$ > \"$DIR/wm.pid\"\necho \"$DISPLAY\" > \"$DIR/wm.display\"\nexec sleep 30\n"
        ));
        write(dir.path(), "browser.sh", &format!(
            "DIR='{d}'\necho \"$*\" > \"$DIR/browser.args\"\nexec sleep 30\n"
        ));
        write(dir.path(), "scrot.sh", &format!(
            "DIR='{d}'\n[ \"$1\" = \"-o\" ] || exit 2\ncat \"$DIR/screen\" > \"$2\"\n"
        ));
        // Option handling follows xdotool's getopt: a `-`-prefixed payload
        // is rejected unless `--` comes before it.
        write(dir.path(), "xdotool.sh", &format!(
            r#"DIR='{d}'
ALL="$*"
echo "$ALL" >> "$DIR/calls.log"
case "$1" in
  getmouselocation)
    cat "$DIR/pos" 2>/dev/null || echo "x:0 y:0 screen:0 window:1"
    exit 0
    ;;
  type|key)
    CMD="$1"
    shift
    while [ $# -gt 0 ]; do
      case "$1" in
        --) shift; break ;;
        --delay|--window) [ $# -ge 2 ] || exit 1; shift 2 ;;
        -*) echo "$CMD: unrecognized option '$1'" >&2; exit 1 ;;
        *) break ;;
      esac
    done
    [ $# -gt 0 ] || exit 1
    if [ "$CMD" = key ] && [ "$1" = "{BAD_KEY}" ]; then
      echo "(symbol) No such key name '$1'" >&2
      exit 1
    fi
    ;;
  mousemove)
    echo "x:$3 y:$4 screen:0 window:1" > "$DIR/pos"
    ;;
esac
echo "$ALL" >> "$DIR/screen"
"#
        ));
        write(dir.path(), "screen", "desktop\n");

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script(&self, name: &str) -> Vec<String> {
        vec!["sh".into(), self.path().join(name).display().to_string()]
    }

    pub fn config(&self) -> DisplayConfig {
        DisplayConfig {
            display: ":142".into(),
            width: 1024,
            height: 768,
            framebuffer: self.script("xvfb.sh"),
            window_manager: self.script("wm.sh"),
            browser: self.script("browser.sh"),
            probe: self.script("probe_ok.sh"),
            capture: self.script("scrot.sh"),
            input: self.script("xdotool.sh"),
            screenshot_dir: self.path().to_path_buf(),
            start_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(20),
            window_manager_settle: Duration::from_millis(10),
            browser_settle: Duration::from_millis(10),
            action_settle: Duration::from_millis(0),
            typing_delay_ms: 50,
        }
    }

    pub fn unreachable_config(&self, timeout: Duration) -> DisplayConfig {
        DisplayConfig {
            probe: self.script("probe_fail.sh"),
            start_timeout: timeout,
            ..self.config()
        }
    }

    /// Framebuffer that exits immediately, as Xvfb does when the display
    /// number is already taken.
    pub fn conflicting_config(&self) -> DisplayConfig {
        DisplayConfig {
            framebuffer: self.script("exit_now.sh"),
            probe: self.script("probe_fail.sh"),
            ..self.config()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    pub fn read(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.path().join(name))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Like [`FakeDesktop::read`], but gives detached scripts up to a
    /// second to write the file.
    pub fn wait_for(&self, name: &str) -> Option<String> {
        for _ in 0..100 {
            if let Some(s) = self.read(name) {
                return Some(s);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    pub fn framebuffer_pid(&self) -> Option<i32> {
        self.wait_for("xvfb.pid").and_then(|s| s.parse().ok())
    }

    pub fn window_manager_pid(&self) -> Option<i32> {
        self.wait_for("wm.pid").and_then(|s| s.parse().ok())
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        fs::read_dir(self.path())
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("cua-screenshot-"))
                    .unwrap_or(false)
            })
            .collect()
    }
}

pub fn decode(base64: &str) -> String {
    String::from_utf8(B64.decode(base64).expect("valid base64")).expect("utf8 screen")
}

/// True while `pid` exists and is not a zombie.
pub fn process_alive(pid: i32) -> bool {
    if let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state letter follows the parenthesised command name.
        return match stat.rfind(')') {
            Some(i) => stat[i + 1..].trim_start().chars().next() != Some('Z'),
            None => true,
        };
    }
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Gives a signalled process up to a second to go away.
pub fn wait_until_dead(pid: i32) -> bool {
    for _ in 0..100 {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).expect("write fake script");
}
