/*!
# ed-dash

An administrative dashboard for tracking directives (tasked work items) whose
status is derived from a progress percentage, built in Rust on top of a hosted
backend-as-a-service.

## Overview

The dashboard signs a user in against the backend's auth service, performs
create/read/update/delete operations against a single remote table
(`directives`), aggregates the rows into summary cards and charts, and exports
them to an Excel workbook.

## Architecture

### Core Layer
- **Status classifier** - maps a progress percentage to 미이행 / 진행중 / 이행완료
- **Serial numbers** - derives the next `<year>-<sequence>` identifier
- **Aggregation** - status counts and mean progress per department
- **Directive store** - the in-memory, created_at-ordered record set

### Backend Layer
- **Gateway** - async contract for auth and table operations
- **Supabase gateway** - GoTrue + PostgREST over HTTP (reqwest)
- **Memory gateway** - in-process backend with the same semantics

### Presentation Layer
- **Dashboard controller** - session/phase/edit state machine
- **Downloader** - XLSX and CSV export
- **Graph** - SVG bar and donut charts (plotters)
- **App** - axum routes, cookie sessions and handlebars pages

## Modules

- **status**: status classification
- **serial**: serial number generation
- **aggregate**: status counts and department progress
- **directive**: the directive record and its write payloads
- **store**: in-memory record cache
- **error**: error types
- **gateway**: backend contract and session subscriptions
- **memory**: in-process gateway
- **supabase**: HTTP gateway
- **controller**: dashboard state machine
- **downloader**: spreadsheet export
- **graph**: chart rendering
- **config**: backend connection settings
- **app**: routing and handlers
*/

pub mod aggregate;
pub mod controller;
pub mod directive;
pub mod downloader;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod serial;
pub mod status;
pub mod store;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod config;
#[cfg(feature = "web")]
pub mod graph;
#[cfg(feature = "web")]
pub mod supabase;

/// Re-export the types most callers need
pub use aggregate::{DepartmentProgress, StatusCounts, department_progress, status_counts};
pub use controller::{Dashboard, DirectiveForm, Mode, Phase};
pub use directive::{Directive, DirectiveId, DirectivePatch, NewDirective};
pub use error::{AuthError, DashboardError, GatewayError};
pub use gateway::{AuthSession, AuthUser, Gateway, SessionSubscription};
pub use memory::{MemoryBackend, MemoryGateway};
pub use serial::next_serial;
pub use status::{Status, classify};
pub use store::DirectiveStore;

/// Remote table holding the directives
pub const DIRECTIVES_TABLE: &str = "directives";
