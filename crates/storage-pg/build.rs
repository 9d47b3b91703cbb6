// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

fn main() {
    // `sqlx::migrate!` embeds the migrations, rebuild when they change
    println!("cargo:rerun-if-changed=migrations");
}
