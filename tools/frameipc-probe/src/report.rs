// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scenario reports.
//!
//! Plain text for terminals, one JSON document per scenario with `--json`.

use frameipc::{Envelope, Route};
use serde::Serialize;

/// One physical write observed on the transport.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficLine {
    pub route: String,
    pub envelope: Envelope,
}

impl TrafficLine {
    pub fn new(route: Route, envelope: Envelope) -> Self {
        Self {
            route: route.to_string(),
            envelope,
        }
    }
}

/// Result of a single scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub scenario: String,
    pub ok: bool,
    pub notes: Vec<String>,
    pub traffic: Vec<TrafficLine>,
}

impl Report {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            ok: true,
            notes: Vec::new(),
            traffic: Vec::new(),
        }
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.notes.push(line.into());
    }

    /// Record a check; a failed check fails the scenario.
    pub fn check(&mut self, ok: bool, line: impl Into<String>) {
        let line = line.into();
        self.notes
            .push(format!("[{}] {}", if ok { "ok" } else { "FAIL" }, line));
        self.ok &= ok;
    }

    pub fn traffic(&mut self, writes: Vec<(Route, Envelope)>) {
        self.traffic = writes
            .into_iter()
            .map(|(route, envelope)| TrafficLine::new(route, envelope))
            .collect();
    }

    pub fn print_text(&self) {
        println!(
            "== {} {}",
            self.scenario,
            if self.ok { "passed" } else { "FAILED" }
        );
        for note in &self.notes {
            println!("   {}", note);
        }
        if !self.traffic.is_empty() {
            println!("   traffic:");
        }
        for line in &self.traffic {
            let kind = if line.envelope.is_ack {
                "ack "
            } else if line.envelope.ack_name.is_some() {
                "call"
            } else {
                "note"
            };
            println!(
                "     -> {:<8} {} {}@{} {}",
                line.route, kind, line.envelope.name, line.envelope.address, line.envelope.payload
            );
        }
    }

    pub fn print_json(&self) -> Result<(), serde_json::Error> {
        println!("{}", serde_json::to_string(self)?);
        Ok(())
    }
}
