// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder (persistence side of the trade log):
// - Tulis setiap Event (Trade / Summary / Note) ke file .jsonl (append).
// - Bufer dengan BufWriter agar hemat syscall.
// - Flush periodik tiap 1s dan/atau tiap 100 event, dan saat channel ditutup.
// - Otomatis membuat parent directory jika belum ada.
// - Jika tulis gagal, coba reopen file dan lanjut.
//
// ENV: set `RECORD_FILE=/path/to/trades.jsonl` agar aktif.
//
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 100;

/// Open (create/append) the record file. Called once at startup, where failure is fatal.
pub async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    // Pastikan parent directory ada (kalau ada)
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, mut writer: BufWriter<File>, path: String) {
    info!(%path, "recorder: started");

    // Flush periodik (tiap 1 detik) + flush berbasis jumlah event
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    // Channel closed: flush dan keluar
                    if let Err(e) = writer.flush().await {
                        error!(?e, "recorder: final flush failed");
                    }
                    info!("recorder: channel closed, stopped");
                    break;
                };

                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(?e, "recorder: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e2) => {
                            error!(?e2, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                    if let Err(e3) = write_line(&mut writer, &line).await {
                        error!(?e3, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LedgerSnapshot, Side, Trade};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn temp_path(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("macross_bot_rec_{}_{}", name, std::process::id()));
        dir.join("events.jsonl").to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_records_events_as_json_lines() {
        let path = temp_path("lines");
        let _ = std::fs::remove_file(&path);
        let writer = open_writer(&path).await.unwrap();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, writer, path.clone()));

        let trade = Trade {
            timestamp: Utc::now(),
            action: Side::Buy,
            price: Decimal::new(10050, 2),
            shares: 10,
            capital_after: Decimal::new(899500, 2),
            cumulative_profit_after: Decimal::ZERO,
        };
        tx.send(Event::Trade { symbol: "AAPL".into(), trade: trade.clone() }).await.unwrap();
        tx.send(Event::Summary {
            symbol: "AAPL".into(),
            ts: Utc::now(),
            ledger: LedgerSnapshot {
                capital: Decimal::new(899500, 2),
                position: None,
                cumulative_profit: Decimal::ZERO,
                trade_count: 1,
            },
        })
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        match serde_json::from_str::<Event>(lines[0]).unwrap() {
            Event::Trade { symbol, trade: t } => {
                assert_eq!(symbol, "AAPL");
                assert_eq!(t, trade);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(lines[1].contains("Summary"));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_open_writer_fails_on_bad_path() {
        // a path below a regular file cannot be created
        let base = temp_path("badpath");
        let _ = std::fs::create_dir_all(Path::new(&base).parent().unwrap());
        std::fs::write(&base, b"x").unwrap();
        let nested = format!("{base}/nested/events.jsonl");
        assert!(open_writer(&nested).await.is_err());
        let _ = std::fs::remove_file(&base);
    }
}
