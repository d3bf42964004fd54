//! Export orchestrator: paged and streaming exports over a shared worker pool.
//!
//! Every partition task reports to the [`CompletionTracker`] no matter how it
//! ended; the one task that observes completion flushes the workbook.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use axiomkit_io_xlsx::{
    ExportRecord, SharedWorkbook, SheetWriter, SpecRecordLayout, derive_cursor_sheet_name,
    derive_page_sheet_name,
};
use chrono::Utc;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::conf::{calculate_worker_limit, derive_export_file_name};
use crate::report::{ReportExport, ReportExportBuilder};
use crate::source::{BatchHook, CursorScope, CursorSource, PageSource, SpecPageRequest};
use crate::spec::{
    EnumPageCount, EnumPartitionOutcome, ExportError, SourceError, SpecExportOptions,
    SpecExportRequest, SpecPartitionProgress, validate_size_page,
};
use crate::store::ProgressStore;
use crate::tracker::CompletionTracker;

type TypeExportResult = Result<ReportExport, ExportError>;
type TypePathsReserved = Arc<Mutex<BTreeSet<PathBuf>>>;

////////////////////////////////////////////////////////////////////////////////
// #region Ticket

/// Handle to a dispatched export.
pub struct SpecExportTicket {
    /// Generated file name; also the tracker key.
    pub file_name: String,
    /// Path the file will be written to.
    pub path_file_out: PathBuf,
    /// Partitions the job was registered with.
    pub n_partitions: usize,
    receiver: Receiver<TypeExportResult>,
}

impl SpecExportTicket {
    /// Block until the job is finalized.
    ///
    /// Returns [`ExportError::Incomplete`] when every worker ended without completing the job.
    pub fn wait(self) -> TypeExportResult {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(ExportError::Incomplete { file_name: self.file_name }))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region JobContext

/// State shared by the partition tasks of one job.
struct JobContext {
    owner: String,
    file_name: String,
    workbook: SharedWorkbook,
    paths_reserved: TypePathsReserved,
    tracker: CompletionTracker,
    builder_report: Mutex<Option<ReportExportBuilder>>,
    sender: Mutex<Option<Sender<TypeExportResult>>>,
}

impl JobContext {
    /// Run one partition, record its outcome, report it and finalize if it completed the job.
    fn run_partition<F>(&self, n_partition: usize, work: F)
    where
        F: FnOnce() -> Result<(), ExportError>,
    {
        let res_work = run_guarded(n_partition, work);

        let outcome = {
            let mut builder_report = self
                .builder_report
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match res_work {
                Ok(()) => {
                    if let Some(builder) = builder_report.as_mut() {
                        builder.add_succeeded();
                    }
                    EnumPartitionOutcome::Succeeded
                }
                Err(err) => {
                    log::error!(
                        "export {:?} partition {n_partition} failed: {err}",
                        self.file_name
                    );
                    if let Some(builder) = builder_report.as_mut() {
                        builder.add_failure(n_partition, err.to_string());
                    }
                    EnumPartitionOutcome::Failed
                }
            }
        };

        match self.tracker.advance(&self.owner, &self.file_name, outcome) {
            Ok(true) => self.finalize(),
            Ok(false) => {}
            Err(err) => log::error!(
                "export {:?} partition {n_partition} could not report completion: {err}",
                self.file_name
            ),
        }
    }

    fn finalize(&self) {
        let builder = self
            .builder_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();

        let res_export = self
            .workbook
            .close()
            .map(|report_workbook| builder.build(report_workbook))
            .map_err(|err| ExportError::Finalization {
                file_name: self.file_name.clone(),
                message: err.to_string(),
            });
        match &res_export {
            Ok(report) => log::info!("{report}"),
            Err(err) => log::error!("{err}"),
        }

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            // a dropped ticket only means nobody waits for the result
            let _ = sender.send(res_export);
        }
    }
}

impl Drop for JobContext {
    /// Release the output path once every partition task has let go of the job.
    fn drop(&mut self) {
        self.paths_reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.workbook.file_out());
    }
}

/// Run partition work, turning a panic into a partition failure.
fn run_guarded<F>(n_partition: usize, work: F) -> Result<(), ExportError>
where
    F: FnOnce() -> Result<(), ExportError>,
{
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        Err(ExportError::Partition {
            n_partition,
            message: derive_panic_message(payload),
        })
    })
}

fn derive_panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return format!("worker panicked: {msg}");
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return format!("worker panicked: {msg}");
    }
    "worker panicked".to_string()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Exporter

/// Dispatches exports onto a bounded worker pool and resolves finished files.
pub struct XlsxExporter {
    options: SpecExportOptions,
    tracker: CompletionTracker,
    thread_pool: Arc<ThreadPool>,
    /// Output paths of jobs that have not released their workbook yet.
    paths_reserved: TypePathsReserved,
}

impl XlsxExporter {
    /// Exporter with an in-process progress store.
    pub fn new(options: SpecExportOptions) -> Result<Self, ExportError> {
        let tracker = CompletionTracker::in_memory(options.ttl_task);
        Self::with_tracker(options, tracker)
    }

    pub fn with_store(
        options: SpecExportOptions,
        store: Arc<dyn ProgressStore>,
    ) -> Result<Self, ExportError> {
        let tracker = CompletionTracker::new(store, options.ttl_task);
        Self::with_tracker(options, tracker)
    }

    fn with_tracker(
        options: SpecExportOptions,
        tracker: CompletionTracker,
    ) -> Result<Self, ExportError> {
        options.validate()?;
        let n_workers = calculate_worker_limit(options.num_workers_max);
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .thread_name(|n_idx| format!("xlsx-export-{n_idx}"))
            .build()
            .map_err(|err| {
                ExportError::WorkerPool(format!(
                    "Failed to initialize thread pool (workers={n_workers}): {err}"
                ))
            })?;
        Ok(Self {
            options,
            tracker,
            thread_pool: Arc::new(thread_pool),
            paths_reserved: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }

    pub fn options(&self) -> &SpecExportOptions {
        &self.options
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    /// Paged export: one task per page, each writing its own `start-end` sheet.
    pub fn export_pages<T, S>(
        &self,
        request: &SpecExportRequest,
        source: Arc<S>,
        page_count: EnumPageCount,
    ) -> Result<SpecExportTicket, ExportError>
    where
        T: ExportRecord,
        S: PageSource<T> + ?Sized + 'static,
    {
        let size_page = request.size_page.unwrap_or(self.options.size_page);
        validate_size_page(size_page)?;
        let layout = SpecRecordLayout::of::<T>()?;
        let n_pages = match page_count {
            EnumPageCount::Fixed(0) => {
                return Err(ExportError::InvalidOption(
                    "page count must be at least 1".to_string(),
                ));
            }
            EnumPageCount::Fixed(n_pages) => n_pages,
            EnumPageCount::Auto => {
                let page = source.fetch(SpecPageRequest::count(size_page))?;
                let n_total = page.n_total.ok_or_else(|| {
                    SourceError::Fetch("count query returned no total".to_string())
                })?;
                calculate_page_count(n_total, size_page)
            }
        };

        let (ctx, ticket) = self.open_job(request, n_pages)?;
        for n_page in 1..=n_pages {
            let ctx = Arc::clone(&ctx);
            let layout = Arc::clone(&layout);
            let source = Arc::clone(&source);
            self.thread_pool.spawn(move || {
                ctx.run_partition(n_page, || {
                    write_page::<T, S>(&ctx, layout, source.as_ref(), n_page, size_page)
                });
            });
        }
        Ok(ticket)
    }

    /// Streaming export: one task drains the cursor under one transactional scope,
    /// rolling to a new `Page N` sheet whenever the current one is full.
    pub fn export_cursor<T, S>(
        &self,
        request: &SpecExportRequest,
        source: Arc<S>,
        hook: Option<BatchHook<T>>,
    ) -> Result<SpecExportTicket, ExportError>
    where
        T: ExportRecord,
        S: CursorSource<T> + ?Sized + 'static,
    {
        let size_page = request.size_page.unwrap_or(self.options.size_page);
        validate_size_page(size_page)?;
        let size_batch = request.size_batch.unwrap_or(self.options.size_batch_cursor);
        if size_batch == 0 {
            return Err(ExportError::InvalidOption(
                "size_batch must be at least 1".to_string(),
            ));
        }
        let layout = SpecRecordLayout::of::<T>()?;

        let (ctx, ticket) = self.open_job(request, 1)?;
        self.thread_pool.spawn(move || {
            ctx.run_partition(1, || {
                write_cursor::<T, S>(
                    &ctx,
                    layout,
                    source.as_ref(),
                    hook,
                    size_batch,
                    size_page,
                )
            });
        });
        Ok(ticket)
    }

    /// Tracked jobs of an owner with their progress.
    pub fn list_tasks(
        &self,
        owner: &str,
    ) -> Result<BTreeMap<String, SpecPartitionProgress>, ExportError> {
        self.tracker.query(owner)
    }

    pub fn contains_task(&self, owner: &str, file_name: &str) -> Result<bool, ExportError> {
        self.tracker.exists(owner, file_name)
    }

    /// Resolve a finished export for download.
    ///
    /// A tracked job whose file is gone is evicted from the tracker.
    pub fn locate_export_file(&self, owner: &str, file_name: &str) -> Result<PathBuf, ExportError> {
        let Some(progress) = self.tracker.progress(owner, file_name)? else {
            return Err(ExportError::TaskNotFound {
                file_name: file_name.to_string(),
            });
        };
        if !progress.is_complete() {
            return Err(ExportError::InProgress {
                file_name: file_name.to_string(),
                progress: progress.to_string(),
            });
        }

        let path_file = self.options.dir_export.join(file_name);
        if !path_file.is_file() {
            self.tracker.evict(owner, file_name)?;
            log::warn!(
                "export file {} is gone; evicted task {file_name:?}",
                path_file.display()
            );
            return Err(ExportError::FileGone {
                file_name: file_name.to_string(),
            });
        }
        Ok(path_file)
    }

    /// Prepare the output directory, reserve a file name and register the job.
    ///
    /// The name is checked and reserved under one lock, so concurrent jobs of
    /// any owner never share an output path.
    fn open_job(
        &self,
        request: &SpecExportRequest,
        n_partitions: usize,
    ) -> Result<(Arc<JobContext>, SpecExportTicket), ExportError> {
        let dir_export = &self.options.dir_export;
        fs::create_dir_all(dir_export).map_err(|err| ExportError::Storage {
            path: dir_export.clone(),
            message: err.to_string(),
        })?;

        let (file_name, path_file_out) = {
            let mut set_paths_reserved = self
                .paths_reserved
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut ts_created_ms = Utc::now().timestamp_millis();
            let mut file_name = derive_export_file_name(&request.name, ts_created_ms);
            let mut path_file_out = dir_export.join(&file_name);
            while set_paths_reserved.contains(&path_file_out)
                || path_file_out.exists()
                || self.tracker.exists(&request.owner, &file_name)?
            {
                ts_created_ms += 1;
                file_name = derive_export_file_name(&request.name, ts_created_ms);
                path_file_out = dir_export.join(&file_name);
            }

            self.tracker
                .register(&request.owner, &file_name, n_partitions as u64)?;
            set_paths_reserved.insert(path_file_out.clone());
            (file_name, path_file_out)
        };

        let (sender, receiver) = mpsc::channel();
        let ctx = Arc::new(JobContext {
            owner: request.owner.clone(),
            file_name: file_name.clone(),
            workbook: SharedWorkbook::new(path_file_out.clone()),
            paths_reserved: Arc::clone(&self.paths_reserved),
            tracker: self.tracker.clone(),
            builder_report: Mutex::new(Some(ReportExportBuilder::new(
                file_name.clone(),
                n_partitions as u64,
            ))),
            sender: Mutex::new(Some(sender)),
        });
        let ticket = SpecExportTicket {
            file_name,
            path_file_out,
            n_partitions,
            receiver,
        };
        Ok((ctx, ticket))
    }
}

/// `ceil(total / size_page)`, at least one page so an empty export still completes.
pub fn calculate_page_count(n_total: u64, size_page: usize) -> usize {
    let size_page = size_page.max(1) as u64;
    usize::try_from(n_total.div_ceil(size_page))
        .unwrap_or(usize::MAX)
        .max(1)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PartitionWork

fn write_page<T, S>(
    ctx: &JobContext,
    layout: Arc<SpecRecordLayout>,
    source: &S,
    n_page: usize,
    size_page: usize,
) -> Result<(), ExportError>
where
    T: ExportRecord,
    S: PageSource<T> + ?Sized,
{
    let handle = ctx
        .workbook
        .create_sheet(&derive_page_sheet_name(n_page, size_page), n_page)?;
    let mut writer = SheetWriter::<T>::new(handle, layout)?;

    // the sheet is closed and attached even when the fill fails or panics
    let res_fill = run_guarded(n_page, || {
        let page = source.fetch(SpecPageRequest::page(n_page, size_page))?;
        Ok(writer.append_batch(&page.records)?)
    });

    ctx.workbook.attach(writer.finish()?)?;
    res_fill
}

fn write_cursor<T, S>(
    ctx: &JobContext,
    layout: Arc<SpecRecordLayout>,
    source: &S,
    hook: Option<BatchHook<T>>,
    size_batch: usize,
    size_page: usize,
) -> Result<(), ExportError>
where
    T: ExportRecord,
    S: CursorSource<T> + ?Sized,
{
    let mut scope = source.begin()?;
    let mut writer = match open_cursor_sheet::<T>(ctx, &layout, 1) {
        Ok(writer) => writer,
        Err(err) => {
            scope.rollback();
            return Err(err);
        }
    };
    let res_fill = run_guarded(1, || {
        fill_cursor_sheets(
            ctx,
            &layout,
            &mut *scope,
            hook,
            size_batch,
            size_page,
            &mut writer,
        )
    });
    let res_attach = writer
        .finish()
        .map_err(ExportError::from)
        .and_then(|sheet| Ok(ctx.workbook.attach(sheet)?));

    match res_fill.and(res_attach) {
        Ok(()) => Ok(scope.commit()?),
        Err(err) => {
            scope.rollback();
            Err(err)
        }
    }
}

fn open_cursor_sheet<T: ExportRecord>(
    ctx: &JobContext,
    layout: &Arc<SpecRecordLayout>,
    n_sheet: usize,
) -> Result<SheetWriter<T>, ExportError> {
    let handle = ctx
        .workbook
        .create_sheet(&derive_cursor_sheet_name(n_sheet), n_sheet)?;
    Ok(SheetWriter::new(handle, Arc::clone(layout))?)
}

/// Drain the cursor batch by batch, splitting a batch across the rollover boundary.
fn fill_cursor_sheets<T: ExportRecord>(
    ctx: &JobContext,
    layout: &Arc<SpecRecordLayout>,
    scope: &mut dyn CursorScope<T>,
    mut hook: Option<BatchHook<T>>,
    size_batch: usize,
    size_page: usize,
    writer: &mut SheetWriter<T>,
) -> Result<(), ExportError> {
    let mut cursor = scope.cursor();
    let mut n_sheet = 1;
    loop {
        let mut l_batch = Vec::with_capacity(size_batch);
        while l_batch.len() < size_batch {
            match cursor.next() {
                Some(record) => l_batch.push(record?),
                None => break,
            }
        }
        if l_batch.is_empty() {
            return Ok(());
        }
        if let Some(hook) = hook.as_mut() {
            hook(l_batch.as_mut_slice());
        }

        let mut l_rest = l_batch.as_slice();
        while !l_rest.is_empty() {
            let n_room = size_page.saturating_sub(writer.size());
            if n_room == 0 {
                n_sheet += 1;
                let writer_next = open_cursor_sheet(ctx, layout, n_sheet)?;
                let writer_full = std::mem::replace(writer, writer_next);
                ctx.workbook.attach(writer_full.finish()?)?;
                log::info!(
                    "export {:?} rolled over to sheet {:?}",
                    ctx.file_name,
                    writer.sheet_name()
                );
                continue;
            }
            let n_take = n_room.min(l_rest.len());
            writer.append_batch(&l_rest[..n_take])?;
            l_rest = &l_rest[n_take..];
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
