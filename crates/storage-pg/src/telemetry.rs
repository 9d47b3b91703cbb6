// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::LazyLock;

use opentelemetry::{
    InstrumentationScope,
    metrics::{Histogram, Meter},
};
use opentelemetry_semantic_conventions as semcov;

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semcov::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});

/// Time it took to acquire a connection and open a transaction on it, in
/// seconds
pub(crate) static DB_CLIENT_CONNECTION_CREATE_TIME: LazyLock<Histogram<f64>> =
    LazyLock::new(|| {
        METER
            .f64_histogram("db.client.connection.create_time")
            .with_description("The time it took to create a new connection.")
            .with_unit("s")
            .build()
    });
