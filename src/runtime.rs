//! Python support module imported by every compiled unit as `stdlib`.

pub const RUNTIME_FILE_NAME: &str = "stdlib.py";

pub const RESULT_FILE_NAME: &str = "result.json";

pub const RUNTIME_SOURCE: &str = r#""""Runtime helpers for compiled Snap! projects."""
import json
import os
import random

_report = {'result': None}


def cleanReport():
    _report['result'] = None


def doReport(result, name=None):
    _report['result'] = result
    return result


def dumpReport(script_file):
    folder = os.path.dirname(os.path.abspath(script_file))
    with open(os.path.join(folder, 'result.json'), 'w') as out:
        json.dump(_report['result'], out, default=repr)


def equals(a, b):
    if isinstance(a, str) and isinstance(b, str):
        return a.lower() == b.lower()
    return a == b


def letterOf(index, text):
    text = str(text)
    if 1 <= index <= len(text):
        return text[index - 1]
    return ''


def itemOf(index, items):
    if index == 'last':
        return items[-1]
    if index in ('any', 'random'):
        return random.choice(items)
    return items[int(index) - 1]


def lengthOf(value):
    if isinstance(value, (list, tuple, str)):
        return len(value)
    return len(str(value))


def contains(items, item):
    return any(equals(candidate, item) for candidate in items)


def joinWords(words):
    return ''.join(str(word) for word in words)


def cons(item, items):
    return [item] + list(items)


def car(items):
    return items[0]


def cdr(items):
    return items[1:]


def append(item, items):
    items.append(item)


def insertAtFront(item, items):
    items.insert(0, item)


def insertAt(index, item, items):
    items.insert(index - 1, item)
"#;
