/*!
 * Pipeline coordinator
 *
 * Drives the six phases in strict order over a shared worker pool. Within
 * a phase, tasks run in any order; a phase starts only after every task of
 * the previous phase reported OK. The first non-OK task outcome becomes
 * the job's terminal outcome and the remaining phases are skipped.
 */

use std::collections::BTreeMap;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use crossbeam_channel::bounded;

use crate::config::ImportJob;
use crate::error::{ImportError, Result};
use crate::import::importer::{import_partition, PartitionImportReport};
use crate::import::indexer::index_region;
use crate::import::remap::update_symbol_keys;
use crate::import::scanner::{plan_chunks, scan_chunk, stitch_regions};
use crate::import::shadow::{ShadowTable, TableMeta};
use crate::import::source::SourceFile;
use crate::import::symbols::merge_symbol_column;
use crate::import::value_index::build_value_index;
use crate::import::{CircuitBreaker, Phase, TaskStatus};
use crate::stats::{JobResult, JobStatus};

/// Run an import job to completion.
///
/// Configuration problems surface as `Err`; every runtime outcome of the
/// pipeline itself, including failure and cancellation, is reported
/// through [`JobResult::status`].
pub fn import_csv(job: &ImportJob) -> Result<JobResult> {
    import_csv_with_breaker(job, CircuitBreaker::new())
}

/// Like [`import_csv`], with a caller-owned circuit breaker. Tripping the
/// breaker cancels the job at the next cooperative check.
pub fn import_csv_with_breaker(job: &ImportJob, breaker: CircuitBreaker) -> Result<JobResult> {
    job.validate()?;
    let started = Instant::now();
    let pipeline = Pipeline {
        job,
        breaker,
        workers: job.effective_workers(),
        import_root: job.import_root(),
        shadows: Vec::new(),
        rows: BTreeMap::new(),
        errors: 0,
    };
    Ok(pipeline.run(started))
}

struct Pipeline<'a> {
    job: &'a ImportJob,
    breaker: CircuitBreaker,
    workers: usize,
    import_root: PathBuf,
    /// Worker shadow tables, populated by the partition-import phase
    shadows: Vec<ShadowTable>,
    rows: BTreeMap<String, i64>,
    errors: u64,
}

impl Pipeline<'_> {
    fn run(mut self, started: Instant) -> JobResult {
        match self.execute() {
            Ok(()) => JobResult {
                status: JobStatus::Ok,
                rows_per_partition: self.rows,
                errors: self.errors as i64,
                duration: started.elapsed(),
            },
            Err(e) => {
                self.teardown();
                match e {
                    ImportError::Cancelled => JobResult::cancelled(started.elapsed()),
                    other => {
                        tracing::error!(category = %other.category(), "import failed: {}", other);
                        JobResult::failed(other.to_string(), self.errors as i64, started.elapsed())
                    }
                }
            }
        }
    }

    fn execute(&mut self) -> Result<()> {
        // Before any phase: cancellation here must leave no files behind
        self.ensure_live()?;

        let source = SourceFile::open(&self.job.source)?;
        if source.is_empty() {
            tracing::info!("source is empty, nothing to import");
            return Ok(());
        }
        fs::create_dir_all(&self.import_root).map_err(|e| ImportError::WriteFailed {
            path: self.import_root.clone(),
            source: e,
        })?;

        // Phase 1: locate safe row boundaries
        let chunks = plan_chunks(source.len(), self.workers);
        let job = self.job;
        let breaker = self.breaker.clone();
        let censuses = self.run_phase(Phase::BoundaryCheck, chunks.clone(), |chunk| {
            scan_chunk(&job.source, &chunk, job.buffer_len, &breaker)
        })?;
        let regions = stitch_regions(&chunks, &censuses, source.len())?;

        // Phase 2: parse rows, index timestamps per partition
        self.ensure_live()?;
        let import_root = self.import_root.clone();
        let breaker = self.breaker.clone();
        let reports = self.run_phase(Phase::Indexing, regions, |region| {
            index_region(job, &import_root, &region, &breaker)
        })?;

        let mut max_line_len = 0u64;
        for report in &reports {
            self.errors += report.errors;
            max_line_len = max_line_len.max(report.max_line_len);
        }
        let partition_files = discover_index_files(&self.import_root)?;

        // Phase 3: merge indices, read rows back, fill shadow tables
        self.ensure_live()?;
        let partition_tasks: Vec<(String, Vec<(usize, PathBuf)>)> =
            partition_files.into_iter().collect();
        let reports = self.run_import_phase(partition_tasks, max_line_len)?;
        for report in &reports {
            self.errors += report.errors;
            *self.rows.entry(report.partition.clone()).or_insert(0) += report.rows;
        }

        // Phases 4-6 only have work when some rows landed
        if !self.shadows.is_empty() {
            self.reconcile_symbols()?;
        }

        self.ensure_live()?;
        self.attach()
    }

    /// Phases 4, 5 and 6: dictionary union, key rewrite, index builds.
    fn reconcile_symbols(&mut self) -> Result<()> {
        let job = self.job;
        let final_dir = job.table_dir();
        fs::create_dir_all(&final_dir).map_err(|e| ImportError::WriteFailed {
            path: final_dir.clone(),
            source: e,
        })?;

        // Phase 4: one task per symbol column; dictionaries are serialized
        // per column because tasks are partitioned by column
        self.ensure_live()?;
        let shadows = &self.shadows;
        let symbol_columns = job.schema.symbol_columns();
        self.run_phase(Phase::SymbolTableMerge, symbol_columns.clone(), |column| {
            merge_symbol_column(column, &final_dir, shadows)
        })?;

        // Phase 5: one task per (symbol column, shadow partition)
        self.ensure_live()?;
        let mut remap_tasks: Vec<(PathBuf, String, String, i64)> = Vec::new();
        for shadow in &self.shadows {
            for &column in &symbol_columns {
                let name = &shadow.schema().columns[column].name;
                for (partition, rows) in &shadow.meta().partitions {
                    remap_tasks.push((
                        shadow.root().to_path_buf(),
                        partition.clone(),
                        name.clone(),
                        *rows,
                    ));
                }
            }
        }
        self.run_phase(
            Phase::UpdateSymbolKeys,
            remap_tasks,
            |(root, partition, column, rows)| {
                update_symbol_keys(&root, &partition, &column, rows)
            },
        )?;

        // Phase 6: one task per (indexed column, shadow table)
        self.ensure_live()?;
        let mut index_tasks: Vec<(PathBuf, Vec<String>, String, u32)> = Vec::new();
        for shadow in &self.shadows {
            for &column in &job.schema.indexed_columns() {
                let spec = &job.schema.columns[column];
                let capacity = spec
                    .index_capacity
                    .unwrap_or(job.index_value_block_capacity);
                index_tasks.push((
                    shadow.root().to_path_buf(),
                    shadow.meta().partitions.keys().cloned().collect(),
                    spec.name.clone(),
                    capacity,
                ));
            }
        }
        self.run_phase(
            Phase::BuildIndex,
            index_tasks,
            |(root, partitions, column, capacity)| {
                for partition in &partitions {
                    build_value_index(&root.join(partition), &column, capacity)?;
                }
                Ok(())
            },
        )?;

        for shadow in self.shadows.iter_mut() {
            for &column in &job.schema.indexed_columns() {
                let spec = &job.schema.columns[column];
                shadow.mark_indexed(
                    &spec.name,
                    spec.index_capacity
                        .unwrap_or(job.index_value_block_capacity),
                );
            }
            shadow.store()?;
        }
        Ok(())
    }

    /// Cut the shadow partitions over into the final table and clean up.
    /// Each partition was produced by exactly one worker, so attachment is
    /// a rename per partition; the rename is the atomic cutover point.
    fn attach(&mut self) -> Result<()> {
        let job = self.job;
        let final_dir = job.table_dir();
        fs::create_dir_all(&final_dir).map_err(|e| ImportError::WriteFailed {
            path: final_dir.clone(),
            source: e,
        })?;

        let mut meta = TableMeta {
            name: job.table_name.clone(),
            schema: job.schema.clone(),
            partition_by: job.partition_by,
            timestamp_index: job.timestamp_index,
            partitions: BTreeMap::new(),
            indexed: BTreeMap::new(),
        };
        for &column in &job.schema.indexed_columns() {
            let spec = &job.schema.columns[column];
            meta.indexed.insert(
                spec.name.clone(),
                spec.index_capacity
                    .unwrap_or(job.index_value_block_capacity),
            );
        }

        for shadow in &self.shadows {
            for (partition, rows) in &shadow.meta().partitions {
                let from = shadow.partition_dir(partition);
                let to = final_dir.join(partition);
                if to.exists() {
                    return Err(ImportError::ContractViolation(format!(
                        "partition {} produced by more than one worker",
                        partition
                    )));
                }
                fs::rename(&from, &to).map_err(|e| ImportError::WriteFailed {
                    path: to.clone(),
                    source: e,
                })?;
                *meta.partitions.entry(partition.clone()).or_insert(0) += rows;
            }
        }
        meta.store(&final_dir)?;

        for shadow in &self.shadows {
            remove_quietly(shadow.root());
        }
        remove_quietly(&self.import_root);
        tracing::info!(
            table = %job.table_name,
            partitions = meta.partitions.len(),
            "import complete"
        );
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.breaker.is_tripped() {
            Err(ImportError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Remove scratch and shadow artifacts after a failed or cancelled job.
    fn teardown(&self) {
        if self.job.keep_artifacts {
            tracing::warn!(
                import_root = %self.import_root.display(),
                "keeping artifacts of unsuccessful import"
            );
            return;
        }
        remove_quietly(&self.import_root);
        for shadow in &self.shadows {
            remove_quietly(shadow.root());
        }
    }

    /// Fan `tasks` out over the pool and collect results in task order.
    /// The first non-OK outcome (in completion order) wins; later outcomes
    /// are counted but not reported.
    fn run_phase<T, R, F>(&self, phase: Phase, tasks: Vec<T>, run: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R> + Sync,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let worker_count = self.workers.min(total);
        tracing::info!(
            phase = phase.name(),
            tasks = total,
            workers = worker_count,
            "phase start"
        );

        // Queue capacity covers the whole phase, so seeding it never blocks
        let (task_tx, task_rx) = bounded::<(usize, T)>(total);
        for pair in tasks.into_iter().enumerate() {
            task_tx
                .send(pair)
                .map_err(|_| ImportError::Parallel("task queue closed early".to_string()))?;
        }
        drop(task_tx);
        let (result_tx, result_rx) = bounded::<(usize, Result<R>)>(total);

        thread::scope(|s| {
            for _ in 0..worker_count {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let breaker = self.breaker.clone();
                let run = &run;
                s.spawn(move || {
                    while let Ok((i, task)) = task_rx.recv() {
                        let result = if breaker.is_tripped() {
                            Err(ImportError::Cancelled)
                        } else {
                            match catch_unwind(AssertUnwindSafe(|| run(task))) {
                                Ok(r) => r,
                                Err(payload) => {
                                    Err(ImportError::Parallel(panic_message(payload)))
                                }
                            }
                        };
                        if result_tx.send((i, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
            let mut first_error: Option<ImportError> = None;
            while let Ok((i, result)) = result_rx.recv() {
                let status = status_of(&result);
                tracing::debug!(
                    phase = phase.name(),
                    task = i,
                    status = status as u8,
                    "task done"
                );
                match result {
                    Ok(r) => slots[i] = Some(r),
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }

            if let Some(e) = first_error {
                return Err(e);
            }
            slots
                .into_iter()
                .map(|slot| {
                    slot.ok_or_else(|| {
                        ImportError::Parallel("worker dropped a task result".to_string())
                    })
                })
                .collect()
        })
    }

    /// The partition-import phase: like [`run_phase`], but each worker owns
    /// a lazily-created shadow table that survives across its tasks and is
    /// handed back to the coordinator afterwards.
    fn run_import_phase(
        &mut self,
        tasks: Vec<(String, Vec<(usize, PathBuf)>)>,
        max_line_len: u64,
    ) -> Result<Vec<PartitionImportReport>> {
        let total = tasks.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let worker_count = self.workers.min(total);
        tracing::info!(
            phase = Phase::PartitionImport.name(),
            tasks = total,
            workers = worker_count,
            "phase start"
        );

        let job = self.job;
        let import_root = &self.import_root;
        // Queue capacity covers the whole phase, so seeding it never blocks
        let (task_tx, task_rx) = bounded::<(usize, (String, Vec<(usize, PathBuf)>))>(total);
        for pair in tasks.into_iter().enumerate() {
            task_tx
                .send(pair)
                .map_err(|_| ImportError::Parallel("task queue closed early".to_string()))?;
        }
        drop(task_tx);
        let (result_tx, result_rx) = bounded::<(usize, Result<PartitionImportReport>)>(total);
        let (shadow_tx, shadow_rx) = bounded::<(usize, ShadowTable)>(worker_count);

        let outcome = thread::scope(|s| {
            for worker in 0..worker_count {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let shadow_tx = shadow_tx.clone();
                let breaker = self.breaker.clone();
                s.spawn(move || {
                    let mut shadow: Option<ShadowTable> = None;
                    while let Ok((i, (partition, files))) = task_rx.recv() {
                        let result = if breaker.is_tripped() {
                            Err(ImportError::Cancelled)
                        } else {
                            run_partition_task(
                                job,
                                import_root,
                                worker,
                                &partition,
                                &files,
                                max_line_len,
                                &mut shadow,
                                &breaker,
                            )
                        };
                        if result_tx.send((i, result)).is_err() {
                            break;
                        }
                    }
                    if let Some(shadow) = shadow {
                        let _ = shadow_tx.send((worker, shadow));
                    }
                });
            }
            drop(result_tx);
            drop(shadow_tx);

            let mut slots: Vec<Option<PartitionImportReport>> =
                (0..total).map(|_| None).collect();
            let mut first_error: Option<ImportError> = None;
            while let Ok((i, result)) = result_rx.recv() {
                let status = status_of(&result);
                tracing::debug!(
                    phase = Phase::PartitionImport.name(),
                    task = i,
                    status = status as u8,
                    "task done"
                );
                match result {
                    Ok(r) => slots[i] = Some(r),
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }

            let mut shadows: Vec<(usize, ShadowTable)> = shadow_rx.iter().collect();
            shadows.sort_by_key(|(worker, _)| *worker);

            (first_error, slots, shadows)
        });

        let (first_error, slots, shadows) = outcome;
        // Shadows are kept even on failure so teardown can remove them
        self.shadows = shadows.into_iter().map(|(_, shadow)| shadow).collect();

        if let Some(e) = first_error {
            return Err(e);
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| {
                    ImportError::Parallel("worker dropped a task result".to_string())
                })
            })
            .collect()
    }
}

/// Body of one partition-import task, shadow creation included, fenced
/// against panics so a host error becomes an ERROR status.
#[allow(clippy::too_many_arguments)]
fn run_partition_task(
    job: &ImportJob,
    import_root: &std::path::Path,
    worker: usize,
    partition: &str,
    files: &[(usize, PathBuf)],
    max_line_len: u64,
    shadow: &mut Option<ShadowTable>,
    breaker: &CircuitBreaker,
) -> Result<PartitionImportReport> {
    match catch_unwind(AssertUnwindSafe(|| {
        if shadow.is_none() {
            *shadow = Some(ShadowTable::create(
                job.shadow_dir(worker),
                format!("{}_{}", job.table_name, worker),
                job.schema.clone(),
                job.partition_by,
                job.timestamp_index,
            )?);
        }
        let shadow = shadow.as_mut().expect("shadow table just created");
        import_partition(
            job,
            import_root,
            partition,
            files,
            max_line_len,
            shadow,
            breaker,
        )
    })) {
        Ok(result) => result,
        Err(payload) => Err(ImportError::Parallel(panic_message(payload))),
    }
}

/// Enumerate the per-chunk index files written by the indexing phase.
/// The scratch tree is the authority: `<importRoot>/<chunkIndex>/<partition>`,
/// with chunk files ordered by chunk so merge tie-breaks keep source order.
fn discover_index_files(
    import_root: &std::path::Path,
) -> Result<BTreeMap<String, Vec<(usize, PathBuf)>>> {
    let mut partition_files: BTreeMap<String, Vec<(usize, PathBuf)>> = BTreeMap::new();
    for entry in walkdir::WalkDir::new(import_root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ImportError::ReadFailed {
            path: import_root.to_path_buf(),
            offset: 0,
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let chunk = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<usize>().ok());
        let Some(chunk) = chunk else {
            // Not a chunk directory (e.g. a merged partition dir)
            continue;
        };
        let partition = entry.file_name().to_string_lossy().into_owned();
        partition_files
            .entry(partition)
            .or_default()
            .push((chunk, entry.path().to_path_buf()));
    }
    for files in partition_files.values_mut() {
        files.sort_by_key(|(chunk, _)| *chunk);
    }
    Ok(partition_files)
}

fn status_of<R>(result: &Result<R>) -> TaskStatus {
    match result {
        Ok(_) => TaskStatus::Ok,
        Err(ImportError::Cancelled) => TaskStatus::Cancel,
        Err(_) => TaskStatus::Error,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

fn remove_quietly(path: &std::path::Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            tracing::warn!("failed to remove {}: {}", path.display(), e);
        }
    }
}
