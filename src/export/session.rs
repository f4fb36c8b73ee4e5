//! Export session: the per-frame driving surface.

use tracing::{debug, info};

use super::layer::LayerOptions;
use super::merge::{MergeStats, Merger};
use super::node::NodeKind;
use super::write::Flush;
use super::{Diagnostics, ExportOptions, InstanceRegistry, NodeId, NodeTree};
use crate::archive::ContainerWriter;
use crate::scene::SampleTree;
use crate::util::{Error, Result};

/// Long-lived export state for one output target.
///
/// Frames are driven strictly in order:
///
/// ```ignore
/// let mut session = ExportSession::new(MemoryArchive::new(), ExportOptions::default());
/// for frame in 0..n {
///     let sample = build_sample_tree(frame);
///     session.reconcile(&sample, frame)?;
///     session.save(&LayerOptions::new())?;
/// }
/// let (archive, diagnostics) = session.finish();
/// ```
pub struct ExportSession<W: ContainerWriter> {
    writer: W,
    options: ExportOptions,
    tree: NodeTree,
    registry: InstanceRegistry,
    diagnostics: Diagnostics,
    /// Frames saved to the current writer.
    frames: usize,
    reconciled: bool,
}

impl<W: ContainerWriter> ExportSession<W> {
    pub fn new(writer: W, options: ExportOptions) -> Self {
        Self {
            writer,
            options,
            tree: NodeTree::new(),
            registry: InstanceRegistry::new(),
            diagnostics: Diagnostics::new(),
            frames: 0,
            reconciled: false,
        }
    }

    /// Merge `sample` into the persistent tree as frame `frame`.
    ///
    /// `frame` counts from zero for the current writer and must be the
    /// next frame to be saved. Reconciling the same frame again replaces
    /// the previous proposal.
    pub fn reconcile(&mut self, sample: &SampleTree, frame: usize) -> Result<MergeStats> {
        let result = self.merge(sample, frame);
        self.report(result)
    }

    fn merge(&mut self, sample: &SampleTree, frame: usize) -> Result<MergeStats> {
        if frame != self.frames {
            return Err(Error::FrameOutOfOrder {
                expected: self.frames,
                got: frame,
            });
        }
        for (key, message) in sample.warnings() {
            self.diagnostics.warn_once(key.clone(), message.clone());
        }

        self.tree.clear_frame();
        let stats = Merger::new(&mut self.tree, &mut self.registry, &mut self.diagnostics).merge(sample)?;
        self.reconciled = true;
        Ok(stats)
    }

    /// Write the current frame. A frame that was never reconciled is saved
    /// as empty: every unlocked node is hidden.
    pub fn save(&mut self, layers: &LayerOptions) -> Result<()> {
        let result = self.flush(layers);
        self.report(result)
    }

    fn flush(&mut self, layers: &LayerOptions) -> Result<()> {
        if !self.reconciled {
            self.tree.clear_frame();
        }
        let assignment = layers.resolve(&self.tree, self.options.full_ancestors);
        Flush {
            tree: &mut self.tree,
            writer: &mut self.writer,
            layers,
            assignment: &assignment,
            options: &self.options,
            nsamples: self.frames + 1,
        }
        .run()?;

        self.frames += 1;
        self.reconciled = false;
        debug!(frame = self.frames - 1, nodes = self.tree.len(), "saved frame");
        Ok(())
    }

    /// Freeze or release the subtree at `id`.
    ///
    /// Locked nodes ignore new proposals and repeat their previous samples.
    /// Locking hardens shape geometry into private copies.
    pub fn lock(&mut self, id: NodeId, locked: bool) -> Result<()> {
        if self.tree.get(id).is_none() {
            return Err(Error::UnknownNode(id.index()));
        }
        self.tree.set_locked(id, locked);
        for n in self.tree.subtree(id) {
            if let NodeKind::Shape(s) = &mut self.tree.node_mut(n).kind {
                if locked && !s.hardened {
                    s.primitive = s.primitive.as_ref().map(|p| p.harden());
                    s.hardened = true;
                } else if !locked {
                    s.hardened = false;
                }
            }
        }
        debug!(path = %self.tree.node(id).path(), locked, "lock changed");
        Ok(())
    }

    /// Swap the output target, returning the previous one.
    ///
    /// Every container binding is purged and the frame count restarts. The
    /// tree keeps its names and child order, so the next save recreates the
    /// same hierarchy in `writer`.
    pub fn rebind(&mut self, writer: W) -> W {
        self.tree.purge();
        self.frames = 0;
        self.reconciled = false;
        info!("rebound export session");
        std::mem::replace(&mut self.writer, writer)
    }

    /// Record an error raised while building or writing a frame.
    ///
    /// Each distinct message is collected once.
    pub fn report_error(&mut self, error: &Error) {
        self.diagnostics.error_once(error.to_string());
    }

    fn report<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.report_error(e);
        }
        result
    }

    /// End the session.
    pub fn finish(self) -> (W, Diagnostics) {
        info!(
            frames = self.frames,
            nodes = self.tree.len(),
            warnings = self.diagnostics.warnings().len(),
            errors = self.diagnostics.errors().len(),
            "finished export"
        );
        (self.writer, self.diagnostics)
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Number of frames saved to the current writer.
    pub fn frame(&self) -> usize {
        self.frames
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Node at a full path such as `/geo/rock`.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.tree.find(path)
    }
}
