// Copyright 2026 The SDV Core Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core of the SDV component runtime: class catalog, object repository and
//! lifecycle orchestration.
//!
//! # Overview
//!
//! This crate contains the following APIs:
//!
//! - [`Runtime`] is the per-process root object. It owns the [`Catalog`]
//!   (modules and classes), the [`Repository`] (live component objects) and
//!   the lifecycle state, and drives every object through its operating
//!   modes.
//! - [`Component`] is the trait a hosted object implements to take part in
//!   the lifecycle. Objects are built by an [`ObjectFactory`] registered
//!   together with a [`ClassDescriptor`].
//! - [`InterfaceMap`] carries the capabilities an object exposes; callers
//!   negotiate access through [`InterfaceId`]-keyed queries instead of
//!   downcasting the object itself.
//!
//! The runtime is strictly in-process: shared state is protected by locks,
//! periodic work runs on plain OS threads, and there is no global instance —
//! hosting code constructs a `Runtime` and passes it to collaborators.
//!
//! [`Runtime`]: struct.Runtime.html
//! [`Catalog`]: struct.Catalog.html
//! [`Repository`]: struct.Repository.html
//! [`Component`]: trait.Component.html
//! [`ObjectFactory`]: type.ObjectFactory.html
//! [`ClassDescriptor`]: struct.ClassDescriptor.html
//! [`InterfaceMap`]: struct.InterfaceMap.html
//! [`InterfaceId`]: struct.InterfaceId.html

#![warn(
    missing_debug_implementations,
    missing_docs,
    unsafe_code,
    bare_trait_objects
)]

pub use crate::{
    catalog::{Catalog, ClassDescriptor, ClassFlags, ModuleId, ModuleInfo, ObjectKind},
    component::{BuiltObject, Component, ObjectFactory},
    error::CoreError,
    interfaces::{InterfaceId, InterfaceMap, InterfaceMapBuilder, InterfaceSpec},
    lifecycle::{
        AppEvent, AppEventHandler, ObjectStatus, OperationMode, OperationState, ShutdownHandle,
    },
    repository::{ObjectFlags, ObjectHandle, ObjectId, ObjectInfo, Repository},
    runtime::{ObjectConfig, Runtime, RuntimeConfig},
};

pub mod helpers;

mod catalog;
mod component;
mod error;
mod interfaces;
mod lifecycle;
mod repository;
mod runtime;
