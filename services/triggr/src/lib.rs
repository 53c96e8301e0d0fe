// Copyright 2024 Algorealm Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(missing_docs)]
//! # Triggr 🕸️
//!
//! A reactive database for onchain events. Contracts emit events;
//! triggers written in a small DSL react to them by mutating the
//! embedded document store; connected clients stream the changes.

/// Service wiring: HTTP/WebSocket server and background tasks.
pub mod service;
