// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

//! Guarded ad-hoc analysis over a read-only warehouse: entity resolution
//! against canonical values, static screening of generated code, and
//! contract-checked execution in a restricted sandbox.

pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod harness;
pub mod resolution;
pub mod sandbox;
pub mod script;
pub mod store;
pub mod tabular;
pub mod telemetry;

pub use config::{EngineConfig, StorageBackend, StorageSettings, TableSource};
pub use engine::QuarryEngine;
pub use error::{QuarryError, Result};
pub use guard::{analyze_code_structure, CodeSafetyValidator, CodeStructure, RESULT_BINDING};
pub use harness::{ExecutionHarness, SUMMARY_BINDING};
pub use resolution::{
    CanonicalValueCache, CanonicalValueSource, CategoryRegistry, CategorySpec, EntityResolver,
    StaticSource, VerifiedEntityLog, WarehouseSource,
};
pub use store::{
    FileObjectStore, FrameWarehouse, LargeObjectStore, MemoryObjectStore, ObjectKey,
    ReadOnlyConnection,
};
pub use quarry_contracts::{
    CacheSettings, ClarificationOption, ContractViolation, ExecutionLimits, ExecutionOutcome,
    ExecutionStatus, ExternalizationPolicy, ExternalizedResult, FailureKind, MatchThresholds,
    ResolutionRequest, ResolutionResult, RuntimeContext, TabularPayload, ValidationVerdict,
    VerifiedEntity,
};
