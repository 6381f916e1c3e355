// Starter sources written by `init`, one per role.
//
// Every template agrees on the same toy problem (an array echoed back), so a
// freshly initialised workspace passes its own suite.

use clap::ValueEnum;
use crucible_common::types::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TemplateLang {
    Cpp,
    Py,
}

impl TemplateLang {
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateLang::Cpp => "cpp",
            TemplateLang::Py => "py",
        }
    }
}

/// File name the resolver will bind to `role`.
pub fn file_name(role: Role, lang: TemplateLang) -> String {
    format!("{}.{}", role.as_str(), lang.extension())
}

pub fn source(role: Role, lang: TemplateLang) -> &'static str {
    match (lang, role) {
        (TemplateLang::Cpp, Role::Generator) => CPP_GENERATOR,
        (TemplateLang::Cpp, Role::Reference | Role::Solution) => CPP_SOLUTION,
        (TemplateLang::Cpp, Role::Validator) => CPP_VALIDATOR,
        (TemplateLang::Py, Role::Generator) => PY_GENERATOR,
        (TemplateLang::Py, Role::Reference | Role::Solution) => PY_SOLUTION,
        (TemplateLang::Py, Role::Validator) => PY_VALIDATOR,
    }
}

const CPP_GENERATOR: &str = r#"#include <chrono>
#include <iostream>
#include <random>
using namespace std;

int main() {
    mt19937 rng(chrono::steady_clock::now().time_since_epoch().count());

    int n = uniform_int_distribution<int>(1, 10)(rng);
    cout << n << "\n";
    for (int i = 0; i < n; i++) {
        cout << uniform_int_distribution<int>(1, 100)(rng);
        if (i < n - 1) cout << " ";
    }
    cout << "\n";
    return 0;
}
"#;

const CPP_SOLUTION: &str = r#"#include <iostream>
#include <vector>
using namespace std;

int main() {
    int n;
    cin >> n;
    vector<int> arr(n);
    for (int i = 0; i < n; i++) cin >> arr[i];

    // Your algorithm here

    for (int i = 0; i < n; i++) {
        cout << arr[i];
        if (i < n - 1) cout << " ";
    }
    cout << "\n";
    return 0;
}
"#;

const CPP_VALIDATOR: &str = r#"#include <fstream>
#include <iostream>
#include <vector>
using namespace std;

// validator <input-file> <output-file>
// exit 0: correct, 1: wrong answer, 2: presentation error
int main(int argc, char* argv[]) {
    if (argc < 3) {
        cerr << "usage: validator <input-file> <output-file>" << endl;
        return 3;
    }
    ifstream in(argv[1]);
    ifstream out(argv[2]);

    int n;
    in >> n;
    vector<long long> arr(n);
    for (auto& x : arr) in >> x;

    for (int i = 0; i < n; i++) {
        long long x;
        if (!(out >> x)) {
            cout << "output ended after " << i << " values" << endl;
            return 2;
        }
        if (x != arr[i]) {
            cout << "value " << i + 1 << ": expected " << arr[i] << ", got " << x << endl;
            return 1;
        }
    }
    string extra;
    if (out >> extra) {
        cout << "unexpected trailing output: " << extra << endl;
        return 2;
    }
    return 0;
}
"#;

const PY_GENERATOR: &str = r#"import random


def main():
    n = random.randint(1, 10)
    print(n)
    print(" ".join(str(random.randint(1, 100)) for _ in range(n)))


if __name__ == "__main__":
    main()
"#;

const PY_SOLUTION: &str = r#"def main():
    n = int(input())
    arr = list(map(int, input().split()))[:n]

    # Your algorithm here

    print(" ".join(map(str, arr)))


if __name__ == "__main__":
    main()
"#;

const PY_VALIDATOR: &str = r#"import sys

# validator <input-file> <output-file>
# exit 0: correct, 1: wrong answer, 2: presentation error


def main():
    if len(sys.argv) < 3:
        print("usage: validator <input-file> <output-file>", file=sys.stderr)
        sys.exit(3)

    with open(sys.argv[1]) as f:
        tokens = f.read().split()
    n = int(tokens[0])
    expected = tokens[1 : n + 1]

    with open(sys.argv[2]) as f:
        got = f.read().split()

    if len(got) != len(expected):
        print(f"expected {len(expected)} values, got {len(got)}")
        sys.exit(2)
    for i, (want, have) in enumerate(zip(expected, got), start=1):
        if want != have:
            print(f"value {i}: expected {want}, got {have}")
            sys.exit(1)
    sys.exit(0)


if __name__ == "__main__":
    main()
"#;
