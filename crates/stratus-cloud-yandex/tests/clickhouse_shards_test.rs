mod common;

use common::{FakeApi, done, provider};
use serde_json::{Value, json};
use stratus_cloud::ResourceData;
use tokio_test::assert_ok;

const CLUSTER: &str = "yandex_mdb_clickhouse_cluster";
const PATH: &str = "managed-clickhouse/v1/clusters/c9q";

fn node() -> Value {
    json!({ "resources": { "resource_preset_id": "s2.micro", "disk_size": 32, "disk_type_id": "network-ssd" } })
}

fn remote_cluster() -> Value {
    json!({
        "id": "c9q",
        "folderId": "b1gfolder",
        "name": "ch",
        "environment": "PRODUCTION",
        "networkId": "enp1",
        "config": {
            "version": "24.3",
            "clickhouse": {
                "resources": { "resourcePresetId": "s2.micro", "diskSize": "34359738368", "diskTypeId": "network-ssd" }
            }
        },
        "status": "RUNNING"
    })
}

fn host(name: &str, zone: &str, shard: &str) -> Value {
    json!({ "name": name, "zoneId": zone, "type": "CLICKHOUSE", "shardName": shard, "assignPublicIp": false })
}

/// ホストのシャード移動がシャードの作成と削除で行われることを確認
#[tokio::test]
async fn test_moving_host_to_new_shard() {
    let api = FakeApi::new();
    let op = || done(json!({ "clusterId": "c9q" }));

    api.expect(&format!("GET {PATH}/shards"), json!({ "shards": [{ "name": "shard2" }] }))
        .expect(
            &format!("GET {PATH}/hosts"),
            json!({ "hosts": [host("host_a", "ru-central1-a", "shard2")] }),
        )
        .expect(&format!("POST {PATH}/shards"), op())
        .expect(&format!("DELETE {PATH}/shards/shard2"), op())
        .expect(&format!("GET {PATH}/databases"), json!({ "databases": [{ "name": "events" }] }))
        .expect(&format!("GET {PATH}"), remote_cluster())
        .expect(
            &format!("GET {PATH}/hosts"),
            json!({ "hosts": [host("host_b", "ru-central1-a", "shard3")] }),
        )
        .expect(&format!("GET {PATH}/shards"), json!({ "shards": [{ "name": "shard3" }] }))
        .expect(&format!("GET {PATH}/databases"), json!({ "databases": [{ "name": "events" }] }));

    let before = json!({
        "name": "ch",
        "folder_id": "b1gfolder",
        "environment": "PRODUCTION",
        "network_id": "enp1",
        "version": "24.3",
        "clickhouse": node(),
        "hosts": [{ "name": "host_a", "zone": "ru-central1-a", "type": "CLICKHOUSE", "shard_name": "shard2", "assign_public_ip": false }],
        "shards": [{ "name": "shard2" }],
        "databases": [{ "name": "events" }],
        "deletion_protection": false
    });
    let after = json!({
        "name": "ch",
        "environment": "PRODUCTION",
        "network_id": "enp1",
        "clickhouse": node(),
        "hosts": [{ "zone": "ru-central1-a", "shard_name": "shard3" }],
        "databases": [{ "name": "events" }]
    });

    let mut data = ResourceData::changed("c9q", before, after).unwrap();
    assert_ok!(provider(&api).update(CLUSTER, &mut data).await);
    api.assert_finished();

    // The shard call carries the moved host; no separate host batch is sent.
    let calls = api.calls();
    assert!(!calls.iter().any(|c| c.contains("hosts:batch")));
    let shard = api.requests()[2].body.clone().unwrap();
    assert_eq!(shard["shardName"], "shard3");
    assert_eq!(shard["hostSpecs"][0]["zoneId"], "ru-central1-a");
    assert_eq!(shard["hostSpecs"][0]["type"], "CLICKHOUSE");

    assert_eq!(data.state()["shards"], json!([{ "name": "shard3" }]));
    assert_eq!(data.state()["hosts"][0]["name"], "host_b");
}

#[tokio::test]
async fn test_public_ip_toggle_updates_host() {
    let api = FakeApi::new();
    let op = || done(json!({ "clusterId": "c9q" }));

    api.expect(&format!("GET {PATH}/shards"), json!({ "shards": [{ "name": "shard1" }] }))
        .expect(
            &format!("GET {PATH}/hosts"),
            json!({ "hosts": [host("host_a", "ru-central1-a", "shard1")] }),
        )
        .expect(&format!("POST {PATH}/hosts:batchUpdate"), op())
        .expect(&format!("GET {PATH}/databases"), json!({}))
        .expect(&format!("POST {PATH}/databases"), op())
        .expect(&format!("GET {PATH}"), remote_cluster())
        .expect(
            &format!("GET {PATH}/hosts"),
            json!({ "hosts": [{ "name": "host_a", "zoneId": "ru-central1-a", "type": "CLICKHOUSE", "shardName": "shard1", "assignPublicIp": true }] }),
        )
        .expect(&format!("GET {PATH}/shards"), json!({ "shards": [{ "name": "shard1" }] }))
        .expect(&format!("GET {PATH}/databases"), json!({ "databases": [{ "name": "events" }] }));

    let before = json!({
        "name": "ch",
        "folder_id": "b1gfolder",
        "environment": "PRODUCTION",
        "network_id": "enp1",
        "version": "24.3",
        "clickhouse": node(),
        "hosts": [{ "name": "host_a", "zone": "ru-central1-a", "type": "CLICKHOUSE", "shard_name": "shard1", "assign_public_ip": false }],
        "deletion_protection": false
    });
    let after = json!({
        "name": "ch",
        "environment": "PRODUCTION",
        "network_id": "enp1",
        "clickhouse": node(),
        "hosts": [{ "zone": "ru-central1-a", "assign_public_ip": true }],
        "databases": [{ "name": "events" }]
    });

    let mut data = ResourceData::changed("c9q", before, after).unwrap();
    assert_ok!(provider(&api).update(CLUSTER, &mut data).await);
    api.assert_finished();

    let update = api.requests()[2].body.clone().unwrap();
    assert_eq!(
        update["updateHostSpecs"],
        json!([{ "hostName": "host_a", "assignPublicIp": true, "updateMask": "assignPublicIp" }])
    );
    assert_eq!(data.state()["hosts"][0]["assign_public_ip"], true);
}

/// ホストを外して別ゾーンに追加したとき、他ホストのサブネットやシャードを引き継がないことを確認
#[tokio::test]
async fn test_replacing_host_does_not_inherit_other_hosts() {
    let api = FakeApi::new();
    let op = || done(json!({ "clusterId": "c9q" }));
    let remote_hosts = json!({ "hosts": [
        host("h1", "ru-central1-a", "shard1"),
        host("h2", "ru-central1-b", "shard1"),
        host("h3", "ru-central1-c", "shard2")
    ] });

    api.expect(
        &format!("GET {PATH}/shards"),
        json!({ "shards": [{ "name": "shard1" }, { "name": "shard2" }] }),
    )
    .expect(&format!("GET {PATH}/hosts"), remote_hosts)
    .expect(&format!("POST {PATH}/hosts:batchCreate"), op())
    .expect(&format!("POST {PATH}/hosts:batchDelete"), op())
    .expect(&format!("GET {PATH}/databases"), json!({}))
    .expect(&format!("GET {PATH}"), remote_cluster())
    .expect(
        &format!("GET {PATH}/hosts"),
        json!({ "hosts": [
            host("h1", "ru-central1-a", "shard1"),
            host("h3", "ru-central1-c", "shard2"),
            host("h4", "ru-central1-d", "shard1")
        ] }),
    )
    .expect(
        &format!("GET {PATH}/shards"),
        json!({ "shards": [{ "name": "shard1" }, { "name": "shard2" }] }),
    )
    .expect(&format!("GET {PATH}/databases"), json!({}));

    let stored = |name: &str, zone: &str, subnet: &str, shard: &str| {
        json!({
            "name": name,
            "zone": zone,
            "subnet_id": subnet,
            "type": "CLICKHOUSE",
            "shard_name": shard,
            "assign_public_ip": false
        })
    };
    let before = json!({
        "name": "ch",
        "folder_id": "b1gfolder",
        "environment": "PRODUCTION",
        "network_id": "enp1",
        "version": "24.3",
        "clickhouse": node(),
        "hosts": [
            stored("h1", "ru-central1-a", "e9b1", "shard1"),
            stored("h2", "ru-central1-b", "e2l1", "shard1"),
            stored("h3", "ru-central1-c", "b0c1", "shard2")
        ],
        "deletion_protection": false
    });
    let after = json!({
        "name": "ch",
        "environment": "PRODUCTION",
        "network_id": "enp1",
        "clickhouse": node(),
        "hosts": [
            { "zone": "ru-central1-a" },
            { "zone": "ru-central1-c", "shard_name": "shard2" },
            { "zone": "ru-central1-d" }
        ]
    });

    let mut data = ResourceData::changed("c9q", before, after).unwrap();
    assert_ok!(provider(&api).update(CLUSTER, &mut data).await);
    api.assert_finished();

    let requests = api.requests();
    let created = requests[2].body.clone().unwrap();
    assert_eq!(
        created["hostSpecs"],
        json!([{
            "zoneId": "ru-central1-d",
            "assignPublicIp": false,
            "shardName": "shard1",
            "type": "CLICKHOUSE"
        }])
    );
    let deleted = requests[3].body.clone().unwrap();
    assert_eq!(deleted["hostNames"], json!(["h2"]));
}
