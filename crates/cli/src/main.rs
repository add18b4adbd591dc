//! # sstable-tool - interactive table writer
//!
//! A REPL that buffers cells in a memtable, flushes them to sstables and
//! inspects the result. Reads commands from stdin and prints results to
//! stdout, so it works both interactively and with piped scripts.
//!
//! ## Commands
//!
//! ```text
//! PUT key column value      Write a regular cell
//! STATIC key column value   Write a static cell
//! DEL key                   Delete the whole partition
//! FLUSH                     Write the memtable to a new table
//! GET key                   Print the live cells of a partition
//! PROBE key                 Ask every table's filter about a key
//! KEYS                      List every partition key in token order
//! STATS                     Print memtable and table statistics
//! EXIT / QUIT               Flush pending writes and shut down
//! ```
//!
//! ## Configuration
//!
//! ```text
//! SSTABLE_DATA_DIR          table directory           (default: "data/sstables")
//! SSTABLE_BLOOM_FP_CHANCE   filter false-positive rate (default: 0.01)
//! SSTABLE_COLUMN_INDEX_KB   promoted index block size  (default: 64)
//! SSTABLE_FORMAT_VERSION    "ma" or "nb"               (default: "nb")
//! SSTABLE_SYNC              fsync on finish            (default: "true")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! sstable-tool started (dir=data/sstables, version=nb, tables=0)
//! > PUT user1 name Alice
//! OK
//! > FLUSH
//! OK data/sstables/nb-1-big (1 partitions, 1 cells)
//! > GET user1
//! name = Alice
//! > EXIT
//! bye
//! ```

mod session;

use anyhow::Result;
use config::SSTableConfig;
use session::Session;
use std::io::{self, BufRead, Write};

fn print_flush(session: &mut Session) {
    match session.flush() {
        Ok(Some(s)) => println!("OK {} ({} partitions, {} cells)", s.table, s.partitions, s.cells),
        Ok(None) => println!("OK (nothing to flush)"),
        Err(e) => println!("ERR flush failed: {:#}", e),
    }
}

/// Splits `KEY COLUMN VALUE...`; the value keeps its inner spaces.
fn key_column_value<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Option<(&'a str, &'a str, String)> {
    let key = parts.next()?;
    let column = parts.next()?;
    let value = parts.collect::<Vec<&str>>().join(" ");
    if value.is_empty() {
        None
    } else {
        Some((key, column, value))
    }
}

fn main() -> Result<()> {
    log_init::init();

    let config = SSTableConfig::from_env()?;
    let mut session = Session::open(config.clone())?;

    println!(
        "sstable-tool started (dir={}, version={}, tables={})",
        config.data_dir.display(),
        config.format_version,
        session.table_count()
    );
    println!("Commands: PUT key column value | STATIC key column value | DEL key | GET key");
    println!("          PROBE key | KEYS | FLUSH | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut exited = false;

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "PUT" => match key_column_value(&mut parts) {
                    Some((k, c, v)) => {
                        session.put(k.as_bytes(), c, v.as_bytes());
                        println!("OK");
                    }
                    None => println!("ERR usage: PUT key column value"),
                },
                "STATIC" => match key_column_value(&mut parts) {
                    Some((k, c, v)) => {
                        session.put_static(k.as_bytes(), c, v.as_bytes());
                        println!("OK");
                    }
                    None => println!("ERR usage: STATIC key column value"),
                },
                "DEL" => {
                    if let Some(k) = parts.next() {
                        session.delete(k.as_bytes());
                        println!("OK");
                    } else {
                        println!("ERR usage: DEL key");
                    }
                }
                "GET" => {
                    if let Some(k) = parts.next() {
                        match session.get(k.as_bytes()) {
                            Ok(cells) if cells.is_empty() => println!("(nil)"),
                            Ok(cells) => {
                                for c in &cells {
                                    println!(
                                        "{}{} = {}",
                                        if c.is_static { "static " } else { "" },
                                        c.column,
                                        String::from_utf8_lossy(&c.value)
                                    );
                                }
                            }
                            Err(e) => println!("ERR read failed: {:#}", e),
                        }
                    } else {
                        println!("ERR usage: GET key");
                    }
                }
                "PROBE" => {
                    if let Some(k) = parts.next() {
                        let answers = session.probe(k.as_bytes());
                        if answers.is_empty() {
                            println!("(no tables)");
                        }
                        for (table, maybe) in answers {
                            println!("{} -> {}", table, if maybe { "maybe" } else { "absent" });
                        }
                    } else {
                        println!("ERR usage: PROBE key");
                    }
                }
                "KEYS" => {
                    let keys = session.keys();
                    for k in &keys {
                        println!("{}", String::from_utf8_lossy(k.key()));
                    }
                    println!("({} keys)", keys.len());
                }
                "FLUSH" => print_flush(&mut session),
                "STATS" => print!("{:?}", session),
                "EXIT" | "QUIT" => {
                    print_flush(&mut session);
                    println!("bye");
                    exited = true;
                    break;
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    if !exited {
        // stdin closed without EXIT
        session.flush()?;
    }
    Ok(())
}
