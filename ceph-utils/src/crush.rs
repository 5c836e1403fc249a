// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crush map edits: bucket moves, monitor placement, and rule installation.
//!
//! Rule installation is a get → decompile → append → compile → set sequence
//! with no optimistic-concurrency protection; all crush edits must be
//! serialized through a single driver.

use crate::executor::Executor;
use crate::{ExecutionError, OsdId};
use camino::Utf8Path;
use slog::{info, o, Logger};

#[derive(Debug, thiserror::Error)]
pub enum CrushError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(
        "crush map lists rule {name:?} {count} times after install (expected 1)"
    )]
    InconsistentRuleCount { name: String, count: usize },
}

/// A replicated rule spanning two data sites with symmetric chooseleaf
/// steps, as required by stretch mode.
#[derive(Clone, Debug)]
pub struct CrushRuleSpec {
    pub name: String,
    pub id: u32,
    pub site_a: String,
    pub site_b: String,
}

impl CrushRuleSpec {
    pub fn render(&self) -> String {
        format!(
            "\nrule {name} {{\n\
             \tid {id}\n\
             \ttype replicated\n\
             \tstep take {a}\n\
             \tstep chooseleaf firstn 2 type host\n\
             \tstep emit\n\
             \tstep take {b}\n\
             \tstep chooseleaf firstn 2 type host\n\
             \tstep emit\n\
             }}\n",
            name = self.name,
            id = self.id,
            a = self.site_a,
            b = self.site_b,
        )
    }
}

pub struct CrushAdmin<'a> {
    exec: &'a dyn Executor,
    host: &'a str,
    log: Logger,
}

impl<'a> CrushAdmin<'a> {
    pub fn new(
        log: &Logger,
        exec: &'a dyn Executor,
        host: &'a str,
    ) -> CrushAdmin<'a> {
        CrushAdmin { exec, host, log: log.new(o!("component" => "crush")) }
    }

    /// Moves one OSD under a different bucket, e.g.
    /// `move_osd(osd, "datacenter", "site-a")`.
    pub fn move_osd(
        &self,
        id: OsdId,
        bucket_type: &str,
        bucket: &str,
    ) -> Result<(), ExecutionError> {
        info!(
            self.log, "moving osd in crush map";
            "osd" => %id,
            "bucket" => format!("{bucket_type}={bucket}"),
        );
        self.exec.exec(
            self.host,
            &format!("ceph osd crush move {id} {bucket_type}={bucket}"),
        )?;
        Ok(())
    }

    pub fn set_mon_location(
        &self,
        mon: &str,
        bucket_type: &str,
        bucket: &str,
    ) -> Result<(), ExecutionError> {
        self.exec.exec(
            self.host,
            &format!("ceph mon set_location {mon} {bucket_type}={bucket}"),
        )?;
        Ok(())
    }

    pub fn enable_stretch_mode(
        &self,
        tiebreaker_mon: &str,
        rule_name: &str,
        dividing_bucket: &str,
    ) -> Result<(), ExecutionError> {
        info!(
            self.log, "enabling stretch mode";
            "tiebreaker" => tiebreaker_mon,
            "rule" => rule_name,
        );
        self.exec.exec(
            self.host,
            &format!(
                "ceph mon enable_stretch_mode {tiebreaker_mon} {rule_name} \
                 {dividing_bucket}"
            ),
        )?;
        Ok(())
    }

    /// Appends `rule` to the live crush map and installs the result.
    ///
    /// Idempotent: if the rule name already appears in the decompiled map,
    /// nothing is changed.  After installation the decompiled map must list
    /// the rule exactly once.
    pub fn install_rule(&self, rule: &CrushRuleSpec) -> Result<(), CrushError> {
        let bin = Utf8Path::new("/tmp/crushmap.bin");
        let txt = Utf8Path::new("/tmp/crushmap.txt");
        let compiled = Utf8Path::new("/tmp/crushmap-new.bin");

        self.exec.exec(self.host, &format!("ceph osd getcrushmap -o {bin}"))?;
        self.exec.exec(self.host, &format!("crushtool -d {bin} -o {txt}"))?;
        let current = self.exec.exec(self.host, &format!("cat {txt}"))?.stdout;

        match rule_count(&current, &rule.name) {
            0 => (),
            1 => {
                info!(
                    self.log, "crush rule already installed";
                    "rule" => &rule.name,
                );
                return Ok(());
            }
            count => {
                return Err(CrushError::InconsistentRuleCount {
                    name: rule.name.clone(),
                    count,
                });
            }
        }

        let edited = format!("{current}{}", rule.render());
        self.exec.write_file(self.host, txt, &edited)?;
        self.exec
            .exec(self.host, &format!("crushtool -c {txt} -o {compiled}"))?;
        self.exec
            .exec(self.host, &format!("ceph osd setcrushmap -i {compiled}"))?;
        info!(self.log, "crush rule installed"; "rule" => &rule.name);

        // Re-read and confirm the edit took and didn't duplicate the rule.
        self.exec.exec(self.host, &format!("ceph osd getcrushmap -o {bin}"))?;
        self.exec.exec(self.host, &format!("crushtool -d {bin} -o {txt}"))?;
        let installed = self.exec.exec(self.host, &format!("cat {txt}"))?.stdout;
        match rule_count(&installed, &rule.name) {
            1 => Ok(()),
            count => Err(CrushError::InconsistentRuleCount {
                name: rule.name.clone(),
                count,
            }),
        }
    }
}

fn rule_count(crushmap_text: &str, rule_name: &str) -> usize {
    let header = format!("rule {rule_name} {{");
    crushmap_text.lines().filter(|l| l.trim() == header).count()
}
