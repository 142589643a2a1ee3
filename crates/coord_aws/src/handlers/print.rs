//! Handlers that write change records to an output stream, one line each.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use coord_core::handler::{ChangeHandler, HandlerError};
use coord_core::record::{ChangeRecord, ChangeSummary};

/// Prints the complete record as JSON.
pub struct PrintRecord<W> {
    out: Mutex<W>,
}

/// Prints `[time] - EVENT - key=value, ...`.
pub struct PrintSummary<W> {
    out: Mutex<W>,
}

impl PrintRecord<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl PrintSummary<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> PrintRecord<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<W: Write + Send> PrintSummary<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn write_line<W: Write>(out: &Mutex<W>, line: &str) -> Result<(), HandlerError> {
    let mut out = out
        .lock()
        .map_err(|_| HandlerError::new("output lock poisoned"))?;
    writeln!(out, "{line}").map_err(|error| HandlerError::new(error.to_string()))?;
    out.flush()
        .map_err(|error| HandlerError::new(error.to_string()))
}

#[async_trait]
impl<W: Write + Send> ChangeHandler for PrintRecord<W> {
    async fn handle(
        &self,
        record: &ChangeRecord,
        _summary: &ChangeSummary,
    ) -> Result<(), HandlerError> {
        let line = serde_json::to_string(&record.raw)
            .map_err(|error| HandlerError::new(error.to_string()))?;
        write_line(&self.out, &line)
    }

    fn name(&self) -> &str {
        "print_record"
    }
}

#[async_trait]
impl<W: Write + Send> ChangeHandler for PrintSummary<W> {
    async fn handle(
        &self,
        _record: &ChangeRecord,
        summary: &ChangeSummary,
    ) -> Result<(), HandlerError> {
        write_line(&self.out, &summary.to_string())
    }

    fn name(&self) -> &str {
        "print_summary"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use coord_core::record::ChangeKind;

    use super::*;

    fn record() -> ChangeRecord {
        ChangeRecord {
            event_id: "e-1".to_string(),
            event_name: ChangeKind::Insert,
            approximate_creation_time: None,
            keys: BTreeMap::from([("PK".to_string(), "LOCK".to_string())]),
            sequence_number: None,
            raw: serde_json::json!({ "eventID": "e-1", "eventName": "INSERT" }),
        }
    }

    #[tokio::test]
    async fn record_printer_writes_one_json_line_per_record() {
        let handler = PrintRecord::new(Vec::new());
        let record = record();
        let summary = ChangeSummary::from_record(&record);

        handler.handle(&record, &summary).await.expect("print");
        handler.handle(&record, &summary).await.expect("print");

        let output = String::from_utf8(handler.into_inner()).expect("utf8");
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("json line");
        assert_eq!(parsed["eventID"], "e-1");
    }

    #[tokio::test]
    async fn summary_printer_writes_the_summary_line() {
        let handler = PrintSummary::new(Vec::new());
        let record = record();
        let summary = ChangeSummary::from_record(&record);

        handler.handle(&record, &summary).await.expect("print");

        let output = String::from_utf8(handler.into_inner()).expect("utf8");
        assert_eq!(output, "[-] - INSERT - PK=LOCK\n");
    }
}
