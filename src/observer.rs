//! Parse events
//!
//! The opening pipeline does not log on its own. It reports structured
//! [ParseEvent]s to the [ParseObserver] it was given, and the default observer,
//! [LogObserver], forwards them to the `log` facade. Callers that want the
//! events elsewhere (a test, a validation report) pass their own observer.

use std::fmt;

use log::{debug, trace, warn};

use crate::error::EpubError;

/// Stages of the opening pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Archive,
    Mimetype,
    Container,
    Package,
    Validation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Archive => "archive",
            Stage::Mimetype => "mimetype",
            Stage::Container => "container",
            Stage::Package => "package",
            Stage::Validation => "validation",
        };
        f.write_str(name)
    }
}

/// An event reported while an EPUB is being opened
#[derive(Debug)]
pub enum ParseEvent<'a> {
    /// The archive was opened and its entry table built
    ArchiveIndexed { epub: &'a str, entries: usize },

    /// A package document was decoded
    PackageParsed {
        epub: &'a str,
        path: &'a str,
        manifest_items: usize,
        spine_items: usize,
    },

    /// A non-fatal inconsistency that does not prevent opening
    Warning {
        epub: &'a str,
        path: &'a str,
        message: String,
    },

    /// A stage rejected the archive; the open call fails with `error`
    Rejected {
        epub: &'a str,
        stage: Stage,
        error: &'a EpubError,
    },

    /// The document was opened and validated
    Opened {
        epub: &'a str,
        rootfile: &'a str,
        media_type: &'a str,
    },
}

/// Receiver of [ParseEvent]s
///
/// Implemented for every `Fn(&ParseEvent)` closure.
pub trait ParseObserver {
    fn on_event(&self, event: &ParseEvent<'_>);
}

impl<F> ParseObserver for F
where
    F: Fn(&ParseEvent<'_>),
{
    fn on_event(&self, event: &ParseEvent<'_>) {
        self(event)
    }
}

/// Forwards events to the `log` facade
///
/// Rejections and progress are logged at trace level, a successful open at debug
/// level and inconsistencies as warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ParseObserver for LogObserver {
    fn on_event(&self, event: &ParseEvent<'_>) {
        match event {
            ParseEvent::ArchiveIndexed { epub, entries } => {
                trace!("{}: indexed {} archive entries", epub, entries)
            }
            ParseEvent::PackageParsed {
                epub,
                path,
                manifest_items,
                spine_items,
            } => trace!(
                "{}: parsed package \"{}\" ({} manifest items, {} spine items)",
                epub, path, manifest_items, spine_items
            ),
            ParseEvent::Warning {
                epub,
                path,
                message,
            } => warn!("{}: {}: {}", epub, path, message),
            ParseEvent::Rejected { epub, stage, error } => {
                trace!("{}: not an epub ({} stage): {}", epub, stage, error)
            }
            ParseEvent::Opened {
                epub,
                rootfile,
                media_type,
            } => debug!(
                "{}: opened epub, rootfile \"{}\" ({})",
                epub, rootfile, media_type
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ParseObserver for NoopObserver {
    fn on_event(&self, _event: &ParseEvent<'_>) {}
}
